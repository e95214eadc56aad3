//! Per-player control snapshots
//!
//! An [`InputState`] is a named set of buttons and axes as polled on the
//! client. Buttons carry one-shot `pressed`/`released` flags that are only
//! meaningful on states produced by a replay cursor.

pub mod kind;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use kind::{AxisEncoding, ControlChange, InputDelta, InputKind};

/// Button level plus edge flags for the current step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonState {
    pub down: bool,
    #[serde(default)]
    pub pressed: bool,
    #[serde(default)]
    pub released: bool,
}

impl ButtonState {
    pub fn new(down: bool) -> Self {
        Self {
            down,
            ..Self::default()
        }
    }

    /// Move to `down`, raising the matching edge flag on a transition.
    pub fn transition(&mut self, down: bool) {
        if down != self.down {
            if down {
                self.pressed = true;
            } else {
                self.released = true;
            }
        }
        self.down = down;
    }

    pub fn clear_edges(&mut self) {
        self.pressed = false;
        self.released = false;
    }
}

/// A single named control
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Control {
    #[serde(rename = "btn")]
    Button(ButtonState),
    #[serde(rename = "axis")]
    Axis { value: f64 },
}

/// Snapshot of every control a player has
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputState {
    controls: BTreeMap<String, Control>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_button(mut self, name: impl Into<String>, down: bool) -> Self {
        self.set_button(name, down);
        self
    }

    pub fn with_axis(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set_axis(name, value);
        self
    }

    /// Set a button's level as polled. Edge flags are left alone; they are
    /// derived during replay.
    pub fn set_button(&mut self, name: impl Into<String>, down: bool) {
        let name = name.into();
        match self.controls.get_mut(&name) {
            Some(Control::Button(button)) => button.down = down,
            _ => {
                self.controls
                    .insert(name, Control::Button(ButtonState::new(down)));
            }
        }
    }

    /// Set an axis value. Non-finite values are stored as 0.0.
    pub fn set_axis(&mut self, name: impl Into<String>, value: f64) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.controls.insert(name.into(), Control::Axis { value });
    }

    pub fn control(&self, name: &str) -> Option<&Control> {
        self.controls.get(name)
    }

    pub fn button(&self, name: &str) -> Option<&ButtonState> {
        match self.controls.get(name) {
            Some(Control::Button(button)) => Some(button),
            _ => None,
        }
    }

    pub fn down(&self, name: &str) -> bool {
        self.button(name).is_some_and(|b| b.down)
    }

    pub fn up(&self, name: &str) -> bool {
        self.button(name).is_some_and(|b| !b.down)
    }

    pub fn pressed(&self, name: &str) -> bool {
        self.button(name).is_some_and(|b| b.pressed)
    }

    pub fn released(&self, name: &str) -> bool {
        self.button(name).is_some_and(|b| b.released)
    }

    pub fn axis(&self, name: &str) -> Option<f64> {
        match self.controls.get(name) {
            Some(Control::Axis { value }) => Some(*value),
            _ => None,
        }
    }

    pub fn controls(&self) -> impl Iterator<Item = (&str, &Control)> {
        self.controls.iter().map(|(name, c)| (name.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.controls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controls.is_empty()
    }

    /// Clear every button's edge flags.
    pub fn clear_edges(&mut self) {
        for control in self.controls.values_mut() {
            if let Control::Button(button) = control {
                button.clear_edges();
            }
        }
    }

    /// Compare button levels and axis values, ignoring edge flags.
    pub fn same_levels(&self, other: &InputState) -> bool {
        self.controls.len() == other.controls.len()
            && self
                .controls
                .iter()
                .zip(other.controls.iter())
                .all(|((na, a), (nb, b))| {
                    na == nb
                        && match (a, b) {
                            (Control::Button(a), Control::Button(b)) => a.down == b.down,
                            (Control::Axis { value: a }, Control::Axis { value: b }) => a == b,
                            _ => false,
                        }
                })
    }

    pub(crate) fn entry_mut(&mut self, name: &str) -> Option<&mut Control> {
        self.controls.get_mut(name)
    }

    pub(crate) fn insert(&mut self, name: String, control: Control) {
        self.controls.insert(name, control);
    }

    pub(crate) fn remove(&mut self, name: &str) {
        self.controls.remove(name);
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Control> {
        self.controls.get(name)
    }
}
