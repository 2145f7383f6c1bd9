//! Property-based invariant tests for random binding graphs.
//!
//! A graph has a few plain source properties and a layer of derived
//! properties, each bound to the sum of a random set of earlier properties.
//! A plain recomputation from the source values serves as the model.
//!
//! 1. Every read matches the model after any sequence of writes.
//! 2. Each binding depends on exactly the distinct properties it reads.
//! 3. Outside groups, a handler fires once per write iff its value changed.
//! 4. Inside a group, a derived handler fires at most once, iff the net
//!    value changed.
//! 5. Taking and reinstalling every binding preserves all values.

use std::cell::Cell;
use std::collections::BTreeSet;
use std::rc::Rc;

use ftui_property::{Property, PropertyBinding, PropertyChangeHandler, update_group};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct GraphShape {
    sources: usize,
    /// `derived[k]` lists the inputs of property `sources + k`; every input
    /// index is smaller than that.
    derived: Vec<Vec<usize>>,
}

impl GraphShape {
    fn len(&self) -> usize {
        self.sources + self.derived.len()
    }

    fn model(&self, source_values: &[i64]) -> Vec<i64> {
        let mut values = source_values.to_vec();
        for inputs in &self.derived {
            let v = inputs.iter().map(|&i| values[i]).sum::<i64>() + 1;
            values.push(v);
        }
        values
    }

    fn build(&self) -> Vec<Property<i64>> {
        let mut props: Vec<Property<i64>> = (0..self.sources).map(|_| Property::new(0)).collect();
        for inputs in &self.derived {
            let reads: Vec<Property<i64>> = inputs.iter().map(|&i| props[i].clone()).collect();
            let p = Property::new(0);
            p.set_binding(PropertyBinding::new(move || {
                reads.iter().map(Property::value).sum::<i64>() + 1
            }));
            props.push(p);
        }
        props
    }
}

fn graph_strategy() -> impl Strategy<Value = GraphShape> {
    (1usize..5, 1usize..8)
        .prop_flat_map(|(sources, derived)| {
            let layers: Vec<_> = (0..derived)
                .map(|k| proptest::collection::vec(0..sources + k, 1..4))
                .collect();
            (Just(sources), layers)
        })
        .prop_map(|(sources, derived)| GraphShape { sources, derived })
}

fn writes_strategy() -> impl Strategy<Value = Vec<(usize, i64)>> {
    proptest::collection::vec((0usize..16, -3i64..=3), 1..24)
}

fn count_changes(props: &[Property<i64>]) -> (Vec<Rc<Cell<u32>>>, Vec<PropertyChangeHandler>) {
    props
        .iter()
        .map(|p| {
            let count = Rc::new(Cell::new(0));
            let c = Rc::clone(&count);
            (count, p.on_value_changed(move |_| c.set(c.get() + 1)))
        })
        .unzip()
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Reads match the model
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn reads_match_model(shape in graph_strategy(), writes in writes_strategy()) {
        let props = shape.build();
        let mut sources = vec![0i64; shape.sources];
        for (target, value) in writes {
            let target = target % shape.sources;
            sources[target] = value;
            props[target].set_value(value);

            let expected = shape.model(&sources);
            let actual: Vec<i64> = props.iter().map(Property::value).collect();
            prop_assert_eq!(actual, expected);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2. Dependency sets are exact
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn dependency_count_is_distinct_reads(shape in graph_strategy()) {
        let props = shape.build();
        for (k, inputs) in shape.derived.iter().enumerate() {
            let distinct: BTreeSet<_> = inputs.iter().collect();
            let binding = props[shape.sources + k].binding();
            prop_assert!(binding.is_some());
            prop_assert_eq!(binding.map(|b| b.dependency_count()), Some(distinct.len()));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 3. One notification per changed value
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn handlers_fire_iff_value_changed(shape in graph_strategy(), writes in writes_strategy()) {
        let props = shape.build();
        let (counts, _handlers) = count_changes(&props);
        let mut sources = vec![0i64; shape.sources];

        for (target, value) in writes {
            let target = target % shape.sources;
            let before = shape.model(&sources);
            sources[target] = value;
            let after = shape.model(&sources);

            for c in &counts {
                c.set(0);
            }
            props[target].set_value(value);
            for i in 0..shape.len() {
                let expected = u32::from(before[i] != after[i]);
                prop_assert_eq!(counts[i].get(), expected, "property {}", i);
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Grouped writes notify derived properties at most once
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn grouped_writes_notify_net_changes(shape in graph_strategy(), writes in writes_strategy()) {
        let props = shape.build();
        let (counts, _handlers) = count_changes(&props[shape.sources..]);
        let mut sources = vec![0i64; shape.sources];
        let before = shape.model(&sources);

        update_group(|| {
            for &(target, value) in &writes {
                let target = target % shape.sources;
                sources[target] = value;
                props[target].set_value(value);
            }
        });

        let after = shape.model(&sources);
        for (k, count) in counts.iter().enumerate() {
            let i = shape.sources + k;
            let expected = u32::from(before[i] != after[i]);
            prop_assert_eq!(count.get(), expected, "derived property {}", i);
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5. Take/reinstall round trip
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn take_and_reinstall_preserves_values(shape in graph_strategy(), writes in writes_strategy()) {
        let props = shape.build();
        let mut sources = vec![0i64; shape.sources];
        for &(target, value) in &writes {
            let target = target % shape.sources;
            sources[target] = value;
            props[target].set_value(value);
        }
        let expected = shape.model(&sources);

        let taken: Vec<_> = props[shape.sources..]
            .iter()
            .map(|p| p.take_binding())
            .collect();
        let frozen: Vec<i64> = props.iter().map(Property::value).collect();
        prop_assert_eq!(&frozen, &expected);

        for (p, binding) in props[shape.sources..].iter().zip(taken) {
            prop_assert!(binding.is_some());
            if let Some(binding) = binding {
                p.set_binding(binding);
            }
        }
        let restored: Vec<i64> = props.iter().map(Property::value).collect();
        prop_assert_eq!(restored, expected);
    }
}
