//! Input-state strategy for the history engine
//!
//! Buttons are delta-encoded by level only. Edges are rebuilt on replay:
//! applying a level change raises `pressed`/`released`, and
//! [`StateKind::before_step`] clears those flags at the start of every
//! cursor step, so a flag reads true only during the step that applied the
//! change.

use serde::{Deserialize, Serialize};

use crate::history::StateKind;

use super::{ButtonState, Control, InputState};

/// How axis values are written into a delta
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisEncoding {
    /// Whenever anything changed, carry every axis value.
    #[default]
    Full,
    /// Carry only axes whose value changed.
    Changed,
}

/// One control update on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlChange {
    #[serde(rename = "btn")]
    Button { name: String, down: bool },
    #[serde(rename = "axis")]
    Axis { name: String, value: f64 },
    /// The control no longer exists.
    #[serde(rename = "del")]
    Remove { name: String },
}

impl ControlChange {
    pub fn name(&self) -> &str {
        match self {
            ControlChange::Button { name, .. }
            | ControlChange::Axis { name, .. }
            | ControlChange::Remove { name } => name,
        }
    }
}

/// Ordered list of control updates; empty means "no change".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputDelta(pub Vec<ControlChange>);

impl InputDelta {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ControlChange> {
        self.0.iter()
    }
}

/// [`StateKind`] for [`InputState`]
#[derive(Debug, Clone, Copy, Default)]
pub struct InputKind {
    axes: AxisEncoding,
}

impl InputKind {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_axis_encoding(axes: AxisEncoding) -> Self {
        Self { axes }
    }

    pub fn axis_encoding(&self) -> AxisEncoding {
        self.axes
    }
}

impl StateKind for InputKind {
    type State = InputState;
    type Delta = InputDelta;

    /// Controls present in `from` but missing from `to` are emitted as
    /// removals, after every update.
    fn diff(&self, from: &InputState, to: &InputState) -> InputDelta {
        let mut changes = Vec::new();
        let mut changed = false;

        for (name, control) in to.controls() {
            match (from.get(name), control) {
                (Some(Control::Button(before)), Control::Button(after)) => {
                    if before.down != after.down {
                        changed = true;
                        changes.push(ControlChange::Button {
                            name: name.to_string(),
                            down: after.down,
                        });
                    }
                }
                (_, Control::Button(after)) => {
                    changed = true;
                    changes.push(ControlChange::Button {
                        name: name.to_string(),
                        down: after.down,
                    });
                }
                (Some(Control::Axis { value: before }), Control::Axis { value: after }) => {
                    let moved = before != after;
                    changed |= moved;
                    if moved || self.axes == AxisEncoding::Full {
                        changes.push(ControlChange::Axis {
                            name: name.to_string(),
                            value: *after,
                        });
                    }
                }
                (_, Control::Axis { value }) => {
                    changed = true;
                    changes.push(ControlChange::Axis {
                        name: name.to_string(),
                        value: *value,
                    });
                }
            }
        }

        for (name, _) in from.controls() {
            if to.get(name).is_none() {
                changed = true;
                changes.push(ControlChange::Remove {
                    name: name.to_string(),
                });
            }
        }

        if changed {
            InputDelta(changes)
        } else {
            InputDelta::default()
        }
    }

    fn apply(&self, state: &InputState, delta: &InputDelta) -> InputState {
        let mut next = state.clone();
        for change in delta.iter() {
            match change {
                ControlChange::Button { name, down } => match next.entry_mut(name) {
                    Some(Control::Button(button)) => button.transition(*down),
                    _ => {
                        // New (or retyped) buttons start from "up".
                        let mut button = ButtonState::new(false);
                        button.transition(*down);
                        next.insert(name.clone(), Control::Button(button));
                    }
                },
                ControlChange::Axis { name, value } => {
                    next.insert(name.clone(), Control::Axis { value: *value });
                }
                ControlChange::Remove { name } => next.remove(name),
            }
        }
        next
    }

    fn is_empty(&self, delta: &InputDelta) -> bool {
        delta.is_empty()
    }

    fn before_step(&self, state: &mut InputState) {
        state.clear_edges();
    }
}
