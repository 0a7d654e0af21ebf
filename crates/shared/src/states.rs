use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Estados posibles de un device
///
/// A device starts in `Offline` until the monitor has read its readiness
/// signal at least once. `Error` is entered on alarms, rejections and
/// device-initiated cancels; it is only left through an explicit status
/// reset by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Offline,
    Idle,
    Busy,
    Error,
    Charging,
}

impl DeviceStatus {
    /// True if the device can receive a new command.
    pub fn is_idle(&self) -> bool {
        matches!(self, DeviceStatus::Idle)
    }

    /// True if the device is reachable (monitored and not offline).
    pub fn is_online(&self) -> bool {
        !matches!(self, DeviceStatus::Offline)
    }

    /// True if the device is executing or faulted and must not be reset.
    pub fn is_working(&self) -> bool {
        matches!(self, DeviceStatus::Busy)
    }
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Offline
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceStatus::Offline => write!(f, "OFFLINE"),
            DeviceStatus::Idle => write!(f, "IDLE"),
            DeviceStatus::Busy => write!(f, "BUSY"),
            DeviceStatus::Error => write!(f, "ERROR"),
            DeviceStatus::Charging => write!(f, "CHARGING"),
        }
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFFLINE" => Ok(DeviceStatus::Offline),
            "IDLE" => Ok(DeviceStatus::Idle),
            "BUSY" => Ok(DeviceStatus::Busy),
            "ERROR" => Ok(DeviceStatus::Error),
            "CHARGING" => Ok(DeviceStatus::Charging),
            _ => Err(format!("Invalid DeviceStatus: {}", s)),
        }
    }
}

/// Estados del ciclo de vida del dispatcher
///
/// Transitions are driven by `pause()`, `resume()` and `dispose()` plus the
/// auto-pause-when-empty rule. `Disposed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatcherState {
    Running,
    Paused,
    Disposed,
}

impl DispatcherState {
    /// Valida si una transición de estado es válida
    ///
    /// - Running → Paused, Disposed
    /// - Paused → Running, Disposed
    /// - Disposed → (terminal)
    ///
    /// Same-state "transitions" are not valid transitions, but pause/resume
    /// remain idempotent at the call-site level.
    pub fn can_transition_to(&self, new_state: &DispatcherState) -> bool {
        match (self, new_state) {
            (s, n) if s == n => false,
            (DispatcherState::Running, DispatcherState::Paused) => true,
            (DispatcherState::Running, DispatcherState::Disposed) => true,
            (DispatcherState::Paused, DispatcherState::Running) => true,
            (DispatcherState::Paused, DispatcherState::Disposed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatcherState::Disposed)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, DispatcherState::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, DispatcherState::Paused)
    }
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Running => write!(f, "RUNNING"),
            DispatcherState::Paused => write!(f, "PAUSED"),
            DispatcherState::Disposed => write!(f, "DISPOSED"),
        }
    }
}

/// Task priority, ordered. Declaration order carries the ordering used by
/// the queue comparator; the numeric values are wire-visible in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_i32(&self) -> i32 {
        match self {
            TaskPriority::Low => 1,
            TaskPriority::Normal => 5,
            TaskPriority::High => 8,
            TaskPriority::Critical => 10,
        }
    }
}

impl TryFrom<i32> for TaskPriority {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(TaskPriority::Low),
            5 => Ok(TaskPriority::Normal),
            8 => Ok(TaskPriority::High),
            10 => Ok(TaskPriority::Critical),
            _ => Err(format!("Invalid TaskPriority value: {}", value)),
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskPriority::Low => write!(f, "LOW"),
            TaskPriority::Normal => write!(f, "NORMAL"),
            TaskPriority::High => write!(f, "HIGH"),
            TaskPriority::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Kind of pallet movement requested by the host software.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    Inbound,
    Outbound,
    Transfer,
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Inbound => write!(f, "INBOUND"),
            CommandType::Outbound => write!(f, "OUTBOUND"),
            CommandType::Transfer => write!(f, "TRANSFER"),
        }
    }
}

impl FromStr for CommandType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INBOUND" => Ok(CommandType::Inbound),
            "OUTBOUND" => Ok(CommandType::Outbound),
            "TRANSFER" => Ok(CommandType::Transfer),
            _ => Err(format!("Invalid CommandType: {}", s)),
        }
    }
}

/// Approach side for two-sided rack blocks.
///
/// This is the single canonical wire mapping: `Bottom` encodes to `false`,
/// `Top` encodes to `true`. All PLC direction writes go through
/// [`Direction::as_plc_bool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bottom,
    Top,
}

impl Direction {
    pub fn as_plc_bool(&self) -> bool {
        matches!(self, Direction::Top)
    }

    pub fn from_plc_bool(value: bool) -> Self {
        if value {
            Direction::Top
        } else {
            Direction::Bottom
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Bottom => write!(f, "BOTTOM"),
            Direction::Top => write!(f, "TOP"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_status_default_is_offline() {
        assert_eq!(DeviceStatus::default(), DeviceStatus::Offline);
    }

    #[test]
    fn test_device_status_from_str() {
        assert_eq!("IDLE".parse::<DeviceStatus>().unwrap(), DeviceStatus::Idle);
        assert_eq!(
            "CHARGING".parse::<DeviceStatus>().unwrap(),
            DeviceStatus::Charging
        );
        assert!("INVALID".parse::<DeviceStatus>().is_err());
    }

    #[test]
    fn test_dispatcher_state_transitions() {
        assert!(DispatcherState::Running.can_transition_to(&DispatcherState::Paused));
        assert!(DispatcherState::Paused.can_transition_to(&DispatcherState::Running));
        assert!(DispatcherState::Paused.can_transition_to(&DispatcherState::Disposed));
        assert!(!DispatcherState::Disposed.can_transition_to(&DispatcherState::Running));
        assert!(!DispatcherState::Running.can_transition_to(&DispatcherState::Running));
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::Low < TaskPriority::Normal);
    }

    #[test]
    fn test_priority_numeric_values() {
        assert_eq!(TaskPriority::Low.as_i32(), 1);
        assert_eq!(TaskPriority::Normal.as_i32(), 5);
        assert_eq!(TaskPriority::High.as_i32(), 8);
        assert_eq!(TaskPriority::Critical.as_i32(), 10);
        assert_eq!(TaskPriority::try_from(8).unwrap(), TaskPriority::High);
        assert!(TaskPriority::try_from(3).is_err());
    }

    #[test]
    fn test_direction_wire_encoding() {
        assert!(!Direction::Bottom.as_plc_bool());
        assert!(Direction::Top.as_plc_bool());
        assert_eq!(Direction::from_plc_bool(true), Direction::Top);
        assert_eq!(Direction::from_plc_bool(false), Direction::Bottom);
    }

    #[test]
    fn test_command_type_round_trip() {
        for ct in [
            CommandType::Inbound,
            CommandType::Outbound,
            CommandType::Transfer,
        ] {
            assert_eq!(ct.to_string().parse::<CommandType>().unwrap(), ct);
        }
    }
}
