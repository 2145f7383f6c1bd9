#![no_main]

use arbitrary::Arbitrary;
use ftui_property::{
    Property, PropertyBinding, PropertyChangeHandler, begin_property_update_group,
    end_property_update_group,
};
use libfuzzer_sys::fuzz_target;

const SLOTS: usize = 8;

#[derive(Arbitrary, Debug)]
enum Op {
    Set { slot: u8, value: i16 },
    Bind { slot: u8, inputs: Vec<u8> },
    Take { slot: u8 },
    Read { slot: u8 },
    Eager { slot: u8, on: bool },
    Watch { slot: u8 },
    Unwatch,
    Replace { slot: u8 },
    BeginGroup,
    EndGroup,
}

fn slot(s: u8) -> usize {
    usize::from(s) % SLOTS
}

fuzz_target!(|ops: Vec<Op>| {
    let mut props: Vec<Property<i64>> = (0..SLOTS).map(|_| Property::new(0)).collect();
    let mut handlers: Vec<PropertyChangeHandler> = Vec::new();
    let mut open_groups = 0_usize;

    for op in ops.into_iter().take(256) {
        match op {
            Op::Set { slot: s, value } => props[slot(s)].set_value(i64::from(value)),
            Op::Bind { slot: s, inputs } => {
                // Inputs may include the target itself or form cycles.
                let reads: Vec<_> = inputs
                    .iter()
                    .take(4)
                    .map(|&i| props[slot(i)].downgrade())
                    .collect();
                props[slot(s)].set_binding(PropertyBinding::new(move || {
                    reads
                        .iter()
                        .filter_map(|w| w.upgrade())
                        .map(|p| p.value())
                        .fold(1_i64, i64::wrapping_add)
                }));
            }
            Op::Take { slot: s } => {
                let _ = props[slot(s)].take_binding();
            }
            Op::Read { slot: s } => {
                let _ = props[slot(s)].value();
            }
            Op::Eager { slot: s, on } => props[slot(s)].set_eager(on),
            Op::Watch { slot: s } => {
                let peers = props.iter().map(Property::downgrade).collect::<Vec<_>>();
                handlers.push(props[slot(s)].on_value_changed(move |v| {
                    if let Some(p) = peers[(v.unsigned_abs() as usize) % SLOTS].upgrade() {
                        let _ = p.value();
                    }
                }));
            }
            Op::Unwatch => {
                handlers.pop();
            }
            Op::Replace { slot: s } => props[slot(s)] = Property::new(0),
            Op::BeginGroup => {
                begin_property_update_group();
                open_groups += 1;
            }
            Op::EndGroup => {
                end_property_update_group();
                open_groups = open_groups.saturating_sub(1);
            }
        }
    }

    for _ in 0..open_groups {
        end_property_update_group();
    }
    for p in &props {
        let _ = p.value();
    }
});
