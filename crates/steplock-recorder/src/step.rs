//! Steps and the step list
//!
//! A step is one replayable action. Pointer steps store client-relative
//! coordinates, keyboard steps store keys or text. The set of kinds is closed;
//! anything else found in a project file becomes an inert `Unsupported` step
//! that round-trips untouched.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;

use steplock_core::{Error, Key, KeyChord, MouseButton, NormPoint, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    Click,
    DoubleClick,
    KeyPress,
    Hotkey,
    TypeText,
    ClipboardCopy,
    Wait,
    Focus,
    Unsupported,
}

impl StepKind {
    pub const KNOWN: [StepKind; 8] = [
        StepKind::Click,
        StepKind::DoubleClick,
        StepKind::KeyPress,
        StepKind::Hotkey,
        StepKind::TypeText,
        StepKind::ClipboardCopy,
        StepKind::Wait,
        StepKind::Focus,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StepKind::Click => "Click",
            StepKind::DoubleClick => "DoubleClick",
            StepKind::KeyPress => "KeyPress",
            StepKind::Hotkey => "Hotkey",
            StepKind::TypeText => "TypeText",
            StepKind::ClipboardCopy => "ClipboardCopy",
            StepKind::Wait => "Wait",
            StepKind::Focus => "Focus",
            StepKind::Unsupported => "Unsupported",
        }
    }

    /// Known kinds only; `Unsupported` is never read from a file by name.
    pub fn from_name(name: &str) -> Option<StepKind> {
        Self::KNOWN.into_iter().find(|k| k.name() == name)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, StepKind::Click | StepKind::DoubleClick)
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Condition a `Wait` step polls for instead of sleeping blindly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition")]
pub enum WaitCondition {
    /// Case-insensitive
    WindowTitleContains { text: String, timeout_ms: u64 },
    ClipboardContains { text: String, timeout_ms: u64 },
    /// Executable name such as `saplogon.exe`, case-insensitive
    ProcessExists { process: String, timeout_ms: u64 },
}

impl WaitCondition {
    pub fn timeout_ms(&self) -> u64 {
        match self {
            WaitCondition::WindowTitleContains { timeout_ms, .. }
            | WaitCondition::ClipboardContains { timeout_ms, .. }
            | WaitCondition::ProcessExists { timeout_ms, .. } => *timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StepAction {
    Click {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
    },
    DoubleClick {
        x: f64,
        y: f64,
        #[serde(default)]
        button: MouseButton,
    },
    KeyPress {
        key: Key,
    },
    Hotkey {
        chord: KeyChord,
    },
    TypeText {
        text: String,
        /// Variable whose value replaces `text` at replay
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<String>,
    },
    ClipboardCopy {
        text: String,
        /// Variable that receives the clipboard contents at replay
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    Wait {
        ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<WaitCondition>,
    },
    /// Bring the target to the front without sending input
    Focus {},
    /// Kind written by a newer version. `raw` is the step record as read.
    #[serde(skip)]
    Unsupported { kind: String, raw: Value },
}

impl StepAction {
    pub fn click(at: NormPoint, button: MouseButton) -> Self {
        StepAction::Click {
            x: at.x,
            y: at.y,
            button,
        }
    }

    pub fn kind(&self) -> StepKind {
        match self {
            StepAction::Click { .. } => StepKind::Click,
            StepAction::DoubleClick { .. } => StepKind::DoubleClick,
            StepAction::KeyPress { .. } => StepKind::KeyPress,
            StepAction::Hotkey { .. } => StepKind::Hotkey,
            StepAction::TypeText { .. } => StepKind::TypeText,
            StepAction::ClipboardCopy { .. } => StepKind::ClipboardCopy,
            StepAction::Wait { .. } => StepKind::Wait,
            StepAction::Focus {} => StepKind::Focus,
            StepAction::Unsupported { .. } => StepKind::Unsupported,
        }
    }

    /// Name as written in project files
    pub fn kind_name(&self) -> &str {
        match self {
            StepAction::Unsupported { kind, .. } => kind,
            other => other.kind().name(),
        }
    }

    pub fn point(&self) -> Option<NormPoint> {
        match self {
            StepAction::Click { x, y, .. } | StepAction::DoubleClick { x, y, .. } => {
                Some(NormPoint::new(*x, *y))
            }
            _ => None,
        }
    }

    /// Default label for freshly recorded steps
    pub fn describe(&self) -> String {
        match self {
            StepAction::Click { x, y, button } => match button {
                MouseButton::Left => format!("Click ({:.2}, {:.2})", x, y),
                other => format!("{} click ({:.2}, {:.2})", capitalize(&other.to_string()), x, y),
            },
            StepAction::DoubleClick { x, y, .. } => format!("Double-click ({:.2}, {:.2})", x, y),
            StepAction::KeyPress { key } => format!("Press {}", key),
            StepAction::Hotkey { chord } => format!("Hotkey {}", chord),
            StepAction::TypeText { input: Some(var), .. } => format!("Type {{{{input:{}}}}}", var),
            StepAction::TypeText { text, .. } => format!("Type \"{}\"", ellipsize(text, 32)),
            StepAction::ClipboardCopy { output: Some(var), .. } => format!("Copy to {{{{output:{}}}}}", var),
            StepAction::ClipboardCopy { text, .. } => format!("Copy \"{}\"", ellipsize(text, 32)),
            StepAction::Wait { until: Some(WaitCondition::WindowTitleContains { text, .. }), .. } => {
                format!("Wait for title containing \"{}\"", text)
            }
            StepAction::Wait { until: Some(WaitCondition::ClipboardContains { text, .. }), .. } => {
                format!("Wait for clipboard containing \"{}\"", text)
            }
            StepAction::Wait { until: Some(WaitCondition::ProcessExists { process, .. }), .. } => {
                format!("Wait for process {}", process)
            }
            StepAction::Wait { ms, .. } => format!("Wait {} ms", ms),
            StepAction::Focus {} => "Focus target".to_string(),
            StepAction::Unsupported { kind, .. } => format!("Unsupported step '{}'", kind),
        }
    }

    /// Payload column of the spreadsheet export
    pub fn payload_summary(&self) -> String {
        match self {
            StepAction::Click { x, y, button } | StepAction::DoubleClick { x, y, button } => {
                format!("x={:.4} y={:.4} {}", x, y, button)
            }
            StepAction::KeyPress { key } => key.to_string(),
            StepAction::Hotkey { chord } => chord.to_string(),
            StepAction::TypeText { input: Some(var), .. } => format!("{{{{input:{}}}}}", var),
            StepAction::TypeText { text, .. } => text.clone(),
            StepAction::ClipboardCopy { output: Some(var), text } => {
                format!("{{{{output:{}}}}} (recorded: {})", var, text)
            }
            StepAction::ClipboardCopy { text, .. } => text.clone(),
            StepAction::Wait { ms, until: None } => format!("{} ms", ms),
            StepAction::Wait { ms, until: Some(cond) } => match cond {
                WaitCondition::WindowTitleContains { text, timeout_ms } => {
                    format!("{} ms, then title contains \"{}\" (timeout {} ms)", ms, text, timeout_ms)
                }
                WaitCondition::ClipboardContains { text, timeout_ms } => {
                    format!("{} ms, then clipboard contains \"{}\" (timeout {} ms)", ms, text, timeout_ms)
                }
                WaitCondition::ProcessExists { process, timeout_ms } => {
                    format!("{} ms, then process {} running (timeout {} ms)", ms, process, timeout_ms)
                }
            },
            StepAction::Focus {} => String::new(),
            StepAction::Unsupported { raw, .. } => raw.to_string(),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn ellipsize(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max).collect();
        format!("{}...", head)
    }
}

/// One entry of the step list
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique within the list, assigned on insertion, never renumbered
    pub index: u32,
    pub label: String,
    pub enabled: bool,
    pub action: StepAction,
}

impl Step {
    pub fn new(index: u32, action: StepAction) -> Self {
        let enabled = action.kind() != StepKind::Unsupported;
        Self {
            index,
            label: action.describe(),
            enabled,
            action,
        }
    }

    pub fn kind(&self) -> StepKind {
        self.action.kind()
    }
}

#[derive(Serialize)]
struct StepOut<'a> {
    index: u32,
    label: &'a str,
    enabled: bool,
    #[serde(flatten)]
    action: &'a StepAction,
}

#[derive(Deserialize)]
struct StepIn {
    index: u32,
    #[serde(default)]
    label: String,
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    #[serde(flatten)]
    action: StepAction,
}

fn enabled_by_default() -> bool {
    true
}

impl Serialize for Step {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match &self.action {
            StepAction::Unsupported { raw, .. } => {
                let mut record = raw.clone();
                if let Some(map) = record.as_object_mut() {
                    map.insert("index".into(), Value::from(self.index));
                    map.insert("label".into(), Value::from(self.label.as_str()));
                    map.insert("enabled".into(), Value::from(self.enabled));
                }
                record.serialize(serializer)
            }
            action => StepOut {
                index: self.index,
                label: &self.label,
                enabled: self.enabled,
                action,
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let record = Value::deserialize(deserializer)?;
        let kind = record
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("step record has no `kind`"))?
            .to_string();

        if StepKind::from_name(&kind).is_some() {
            let index = record.get("index").cloned().unwrap_or(Value::Null);
            let wire: StepIn = serde_json::from_value(record)
                .map_err(|e| D::Error::custom(format!("step {} ({}): {}", index, kind, e)))?;
            return Ok(Step {
                index: wire.index,
                label: wire.label,
                enabled: wire.enabled,
                action: wire.action,
            });
        }

        let index = record
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| D::Error::custom(format!("step of kind '{}' has no valid `index`", kind)))?;
        let label = record
            .get("label")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("Unsupported step '{}'", kind));
        tracing::warn!(index, kind = %kind, "unknown step kind, loaded as disabled placeholder");
        Ok(Step {
            index,
            label,
            enabled: false,
            action: StepAction::Unsupported { kind, raw: record },
        })
    }
}

/// Ordered steps of a project.
///
/// Positions are zero-based places in the list; indexes are the stable ids
/// shown to users.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<Step>", into = "Vec<Step>")]
pub struct StepList {
    steps: Vec<Step>,
    next_index: u32,
}

impl PartialEq for StepList {
    fn eq(&self, other: &Self) -> bool {
        self.steps == other.steps
    }
}

impl TryFrom<Vec<Step>> for StepList {
    type Error = String;

    fn try_from(steps: Vec<Step>) -> std::result::Result<Self, Self::Error> {
        let mut seen = std::collections::HashSet::new();
        for step in &steps {
            if !seen.insert(step.index) {
                return Err(format!("duplicate step index {}", step.index));
            }
        }
        let next_index = match steps.iter().map(|s| s.index).max() {
            Some(max) => max
                .checked_add(1)
                .ok_or_else(|| format!("step index {} leaves no room for new steps", max))?,
            None => 1,
        };
        Ok(Self { steps, next_index })
    }
}

impl From<StepList> for Vec<Step> {
    fn from(list: StepList) -> Self {
        list.steps
    }
}

impl StepList {
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            next_index: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Step> {
        self.steps.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    pub fn as_slice(&self) -> &[Step] {
        &self.steps
    }

    pub fn position_of(&self, index: u32) -> Option<usize> {
        self.steps.iter().position(|s| s.index == index)
    }

    fn allocate(&mut self) -> Result<u32> {
        let index = self.next_index.max(1);
        self.next_index = index
            .checked_add(1)
            .ok_or_else(|| Error::invalid_step("Step indexes exhausted, save under a new project"))?;
        Ok(index)
    }

    fn check(&self, position: usize) -> Result<()> {
        if position < self.steps.len() {
            Ok(())
        } else {
            Err(Error::invalid_step(format!(
                "No step at position {} (list has {})",
                position,
                self.steps.len()
            )))
        }
    }

    /// Append a new step, returning its index
    pub fn append(&mut self, action: StepAction) -> Result<u32> {
        let index = self.allocate()?;
        self.steps.push(Step::new(index, action));
        Ok(index)
    }

    pub fn insert(&mut self, position: usize, action: StepAction) -> Result<u32> {
        if position > self.steps.len() {
            return Err(Error::invalid_step(format!(
                "Cannot insert at position {} (list has {})",
                position,
                self.steps.len()
            )));
        }
        let index = self.allocate()?;
        self.steps.insert(position, Step::new(index, action));
        Ok(index)
    }

    pub fn remove(&mut self, position: usize) -> Result<Step> {
        self.check(position)?;
        Ok(self.steps.remove(position))
    }

    pub fn move_step(&mut self, from: usize, to: usize) -> Result<()> {
        self.check(from)?;
        self.check(to)?;
        let step = self.steps.remove(from);
        self.steps.insert(to, step);
        Ok(())
    }

    pub fn duplicate(&mut self, position: usize) -> Result<u32> {
        self.check(position)?;
        let mut copy = self.steps[position].clone();
        copy.index = self.allocate()?;
        let index = copy.index;
        self.steps.insert(position + 1, copy);
        Ok(index)
    }

    pub fn set_label(&mut self, position: usize, label: impl Into<String>) -> Result<()> {
        self.check(position)?;
        self.steps[position].label = label.into();
        Ok(())
    }

    /// Placeholders for unknown kinds stay disabled
    pub fn set_enabled(&mut self, position: usize, enabled: bool) -> Result<()> {
        self.check(position)?;
        let step = &mut self.steps[position];
        if enabled && step.kind() == StepKind::Unsupported {
            return Err(Error::invalid_step(format!(
                "Step {} has kind '{}', which this version cannot replay",
                step.index,
                step.action.kind_name()
            )));
        }
        step.enabled = enabled;
        Ok(())
    }

    /// Replace the payload of a step, keeping its index, label and flag
    pub fn set_action(&mut self, position: usize, action: StepAction) -> Result<()> {
        self.check(position)?;
        let step = &mut self.steps[position];
        if action.kind() == StepKind::Unsupported {
            step.enabled = false;
        }
        step.action = action;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.steps.clear();
    }
}

impl<'a> IntoIterator for &'a StepList {
    type Item = &'a Step;
    type IntoIter = std::slice::Iter<'a, Step>;

    fn into_iter(self) -> Self::IntoIter {
        self.steps.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_of(n: usize) -> StepList {
        let mut list = StepList::new();
        for i in 0..n {
            list.append(StepAction::Wait {
                ms: i as u64,
                until: None,
            })
            .unwrap();
        }
        list
    }

    #[test]
    fn indexes_are_never_reused() {
        let mut list = list_of(3);
        list.remove(2).unwrap();
        assert_eq!(list.append(StepAction::KeyPress { key: Key::Enter }).unwrap(), 4);
        assert_eq!(list.insert(0, StepAction::KeyPress { key: Key::Tab }).unwrap(), 5);
        let indexes: Vec<u32> = list.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![5, 1, 2, 4]);
    }

    #[test]
    fn move_and_duplicate_keep_identity() {
        let mut list = list_of(3);
        list.move_step(0, 2).unwrap();
        let indexes: Vec<u32> = list.iter().map(|s| s.index).collect();
        assert_eq!(indexes, vec![2, 3, 1]);

        let copy = list.duplicate(1).unwrap();
        assert_eq!(copy, 4);
        assert_eq!(list.get(2).unwrap().action, list.get(1).unwrap().action);
        assert!(list.move_step(0, 9).is_err());
    }

    #[test]
    fn edits_out_of_range_fail() {
        let mut list = list_of(1);
        let err = list.set_label(3, "x").unwrap_err();
        assert_eq!(err.code, steplock_core::ErrorCode::InvalidStep);
        assert!(list.insert(5, StepAction::KeyPress { key: Key::Enter }).is_err());
    }

    #[test]
    fn recorded_labels_describe_the_action() {
        let list = {
            let mut l = StepList::new();
            l.append(StepAction::click(NormPoint::new(0.5, 0.25), MouseButton::Right)).unwrap();
            l.append(StepAction::TypeText {
                text: "hello".into(),
                input: Some("user".into()),
            })
            .unwrap();
            l
        };
        assert_eq!(list.get(0).unwrap().label, "Right click (0.50, 0.25)");
        assert_eq!(list.get(1).unwrap().label, "Type {{input:user}}");
    }

    #[test]
    fn step_wire_format_is_flat() {
        let step = Step::new(7, StepAction::Hotkey {
            chord: "CTRL+S".parse().unwrap(),
        });
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(
            value,
            json!({"index": 7, "label": "Hotkey CTRL+S", "enabled": true, "kind": "Hotkey", "chord": "CTRL+S"})
        );
    }

    #[test]
    fn unknown_kind_becomes_disabled_placeholder() {
        let raw = json!({"index": 3, "kind": "Scroll", "label": "Scroll down", "enabled": true, "dy": -120});
        let step: Step = serde_json::from_value(raw).unwrap();
        assert!(!step.enabled);
        assert_eq!(step.kind(), StepKind::Unsupported);
        assert_eq!(step.action.kind_name(), "Scroll");

        let back = serde_json::to_value(&step).unwrap();
        assert_eq!(back["dy"], -120);
        assert_eq!(back["kind"], "Scroll");
        assert_eq!(back["enabled"], false);
    }

    #[test]
    fn malformed_known_kind_is_an_error() {
        let raw = json!({"index": 1, "kind": "Click", "x": "left"});
        assert!(serde_json::from_value::<Step>(raw).is_err());
        assert!(serde_json::from_value::<Step>(json!({"index": 1})).is_err());
    }

    #[test]
    fn duplicate_indexes_are_rejected() {
        let raw = json!([
            {"index": 1, "kind": "Wait", "ms": 10},
            {"index": 1, "kind": "Wait", "ms": 20}
        ]);
        let err = serde_json::from_value::<StepList>(raw).unwrap_err();
        assert!(err.to_string().contains("duplicate step index 1"));
    }

    #[test]
    fn placeholders_cannot_be_enabled() {
        let raw = json!([{"index": 1, "kind": "Scroll", "label": "s", "enabled": true, "dy": 3}]);
        let mut list: StepList = serde_json::from_value(raw).unwrap();

        let err = list.set_enabled(0, true).unwrap_err();
        assert_eq!(err.code, steplock_core::ErrorCode::InvalidStep);
        assert!(list.set_enabled(0, false).is_ok());

        let saved = serde_json::to_value(&list).unwrap();
        assert_eq!(saved[0]["enabled"], false);
        let back: StepList = serde_json::from_value(saved).unwrap();
        assert_eq!(list, back);
    }

    #[test]
    fn replacing_with_a_placeholder_disables_the_step() {
        let mut list = list_of(1);
        list.set_action(0, StepAction::Unsupported { kind: "Drag".into(), raw: json!({"kind": "Drag"}) })
            .unwrap();
        assert!(!list.get(0).unwrap().enabled);
    }

    #[test]
    fn highest_index_is_rejected_on_load() {
        let raw = json!([{"index": u32::MAX, "kind": "KeyPress", "key": "ENTER"}]);
        let err = serde_json::from_value::<StepList>(raw).unwrap_err();
        assert!(err.to_string().contains("no room for new steps"));

        let raw = json!([{"index": u32::MAX - 1, "kind": "KeyPress", "key": "ENTER"}]);
        let mut list: StepList = serde_json::from_value(raw).unwrap();
        assert_eq!(list.append(StepAction::Focus {}).unwrap(), u32::MAX);
        let err = list.append(StepAction::Focus {}).unwrap_err();
        assert_eq!(err.code, steplock_core::ErrorCode::InvalidStep);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn focus_and_process_waits_are_plain_records() {
        let mut list = StepList::new();
        list.append(StepAction::Focus {}).unwrap();
        list.append(StepAction::Wait {
            ms: 0,
            until: Some(WaitCondition::ProcessExists {
                process: "saplogon.exe".into(),
                timeout_ms: 20_000,
            }),
        })
        .unwrap();

        let value = serde_json::to_value(&list).unwrap();
        assert_eq!(value[0], json!({"index": 1, "label": "Focus target", "enabled": true, "kind": "Focus"}));
        assert_eq!(value[1]["until"]["condition"], "ProcessExists");
        assert_eq!(value[1]["until"]["process"], "saplogon.exe");
        assert_eq!(list.get(1).unwrap().label, "Wait for process saplogon.exe");

        let back: StepList = serde_json::from_value(value).unwrap();
        assert_eq!(back, list);
    }
}
