//! Message payloads exchanged with the robot, and their XML encoding.
use std::fmt::Write as _;

use crate::error::{ProtocolError, Result};
use crate::header::MessageType;
use crate::xml::{self, parse_envelope};

fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Named `errorStatus` values the device is known to report. The field is an
/// open-ended numeric code, not an enum: unrecognized values pass through
/// unchanged rather than failing to parse.
pub mod error_status {
    pub const DEFAULT: i32 = 0;
    pub const TASK_COMPLETED: i32 = 8960;
    pub const TASK_CANCELLED: i32 = 8962;
    pub const MOTION_ERROR: i32 = 41729;
    pub const LOW_BATTERY: i32 = 41730;
    pub const MOTOR_OVERHEAT: i32 = 41731;
    pub const CHARGING: i32 = 41732;
}

/// One stop along a patrol route. Fields beyond map/point id are accepted
/// from configuration but round-tripped opaquely; the device owns their
/// interpretation.
#[derive(Clone, Debug, PartialEq)]
pub struct NavigationPoint {
    pub map_id: i32,
    pub point_id: i32,
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub angle_yaw: f64,
    pub point_info: i32,
    pub gait: i32,
    pub speed: i32,
    pub manner: i32,
    pub obs_mode: i32,
    pub navi_mode: i32,
    pub terrain: i32,
    pub posture: i32,
}

impl NavigationPoint {
    fn write_xml(&self, out: &mut String) {
        out.push_str("<Items>");
        let _ = write!(out, "<MapID>{}</MapID>", self.map_id);
        let _ = write!(out, "<Value>{}</Value>", self.point_id);
        let _ = write!(out, "<PosX>{}</PosX>", self.pos_x);
        let _ = write!(out, "<PosY>{}</PosY>", self.pos_y);
        let _ = write!(out, "<PosZ>{}</PosZ>", self.pos_z);
        let _ = write!(out, "<AngleYaw>{}</AngleYaw>", self.angle_yaw);
        let _ = write!(out, "<PointInfo>{}</PointInfo>", self.point_info);
        let _ = write!(out, "<Gait>{}</Gait>", self.gait);
        let _ = write!(out, "<Speed>{}</Speed>", self.speed);
        let _ = write!(out, "<Manner>{}</Manner>", self.manner);
        let _ = write!(out, "<ObsMode>{}</ObsMode>", self.obs_mode);
        let _ = write!(out, "<NavMode>{}</NavMode>", self.navi_mode);
        let _ = write!(out, "<Terrain>{}</Terrain>", self.terrain);
        let _ = write!(out, "<Posture>{}</Posture>", self.posture);
        out.push_str("</Items>");
    }

    fn from_item(item: &std::collections::BTreeMap<String, String>) -> Result<Self> {
        Ok(Self {
            map_id: xml::field_i32(item, "MapID")?,
            point_id: xml::field_i32(item, "Value")?,
            pos_x: xml::field_f64(item, "PosX")?,
            pos_y: xml::field_f64(item, "PosY")?,
            pos_z: xml::field_f64(item, "PosZ")?,
            angle_yaw: xml::field_f64(item, "AngleYaw")?,
            point_info: xml::field_i32(item, "PointInfo")?,
            gait: xml::field_i32(item, "Gait")?,
            speed: xml::field_i32(item, "Speed")?,
            manner: xml::field_i32(item, "Manner")?,
            obs_mode: xml::field_i32(item, "ObsMode")?,
            navi_mode: xml::field_i32(item, "NavMode")?,
            terrain: xml::field_i32(item, "Terrain")?,
            posture: xml::field_i32(item, "Posture")?,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Success,
    Failure,
    Cancelled,
    Unknown(i32),
}

impl ErrorCode {
    fn from_i32(v: i32) -> Self {
        match v {
            0 => ErrorCode::Success,
            1 => ErrorCode::Failure,
            2 => ErrorCode::Cancelled,
            other => ErrorCode::Unknown(other),
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            ErrorCode::Success => 0,
            ErrorCode::Failure => 1,
            ErrorCode::Cancelled => 2,
            ErrorCode::Unknown(v) => v,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavStatus {
    Completed,
    Executing,
    Failed,
    Unknown(i32),
}

impl NavStatus {
    fn from_i32(v: i32) -> Self {
        match v {
            0 => NavStatus::Completed,
            1 => NavStatus::Executing,
            -1 => NavStatus::Failed,
            other => NavStatus::Unknown(other),
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            NavStatus::Completed => 0,
            NavStatus::Executing => 1,
            NavStatus::Failed => -1,
            NavStatus::Unknown(v) => v,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Location {
    Localized,
    Lost,
    Unknown(i32),
}

impl Location {
    fn from_i32(v: i32) -> Self {
        match v {
            0 => Location::Localized,
            1 => Location::Lost,
            other => Location::Unknown(other),
        }
    }

    fn as_i32(self) -> i32 {
        match self {
            Location::Localized => 0,
            Location::Lost => 1,
            Location::Unknown(v) => v,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NavigationTaskRequest {
    pub points: Vec<NavigationPoint>,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CancelTaskRequest {
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryStatusRequest {
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GetRealTimeStatusRequest {
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NavigationTaskResponse {
    pub value: i32,
    pub error_code: ErrorCode,
    pub error_status: i32,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CancelTaskResponse {
    pub error_code: ErrorCode,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueryStatusResponse {
    pub status: NavStatus,
    pub value: i32,
    pub error_code: ErrorCode,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GetRealTimeStatusResponse {
    pub pos_x: f64,
    pub pos_y: f64,
    pub pos_z: f64,
    pub sum_odom: f64,
    pub location: Location,
    pub timestamp: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    NavigationTaskRequest(NavigationTaskRequest),
    CancelTaskRequest(CancelTaskRequest),
    QueryStatusRequest(QueryStatusRequest),
    GetRealTimeStatusRequest(GetRealTimeStatusRequest),
    NavigationTaskResponse(NavigationTaskResponse),
    CancelTaskResponse(CancelTaskResponse),
    QueryStatusResponse(QueryStatusResponse),
    GetRealTimeStatusResponse(GetRealTimeStatusResponse),
    /// Internal sentinel the navigation state machine's terminal-state entry
    /// pushes onto the message queue. Never serialized or parsed off the wire.
    ProcedureReset,
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::NavigationTaskRequest(_) => MessageType::NavigationTaskRequest,
            Message::CancelTaskRequest(_) => MessageType::CancelTaskRequest,
            Message::QueryStatusRequest(_) => MessageType::QueryStatusRequest,
            Message::GetRealTimeStatusRequest(_) => MessageType::GetRealTimeStatusRequest,
            Message::NavigationTaskResponse(_) => MessageType::NavigationTaskResponse,
            Message::CancelTaskResponse(_) => MessageType::CancelTaskResponse,
            Message::QueryStatusResponse(_) => MessageType::QueryStatusResponse,
            Message::GetRealTimeStatusResponse(_) => MessageType::GetRealTimeStatusResponse,
            Message::ProcedureReset => MessageType::ProcedureReset,
        }
    }

    /// Builds the `<PatrolDevice>` body. `Command` is always `1`; the device
    /// never required a second value and the original source hardcodes it too.
    pub fn encode_body(&self) -> String {
        let mut body = String::new();
        let (ty, time, items_xml) = match self {
            Message::NavigationTaskRequest(m) => {
                let mut items = String::new();
                for point in &m.points {
                    point.write_xml(&mut items);
                }
                (MessageType::NavigationTaskRequest, m.timestamp.clone(), items)
            }
            Message::CancelTaskRequest(m) => {
                (MessageType::CancelTaskRequest, m.timestamp.clone(), "<Items/>".to_string())
            }
            Message::QueryStatusRequest(m) => {
                (MessageType::QueryStatusRequest, m.timestamp.clone(), "<Items/>".to_string())
            }
            Message::GetRealTimeStatusRequest(m) => (
                MessageType::GetRealTimeStatusRequest,
                m.timestamp.clone(),
                "<Items/>".to_string(),
            ),
            Message::NavigationTaskResponse(m) => {
                let mut items = String::new();
                items.push_str("<Items>");
                let _ = write!(items, "<Value>{}</Value>", m.value);
                let _ = write!(items, "<ErrorCode>{}</ErrorCode>", m.error_code.as_i32());
                let _ = write!(items, "<ErrorStatus>{}</ErrorStatus>", m.error_status);
                items.push_str("</Items>");
                (MessageType::NavigationTaskResponse, m.timestamp.clone(), items)
            }
            Message::CancelTaskResponse(m) => {
                let mut items = String::new();
                items.push_str("<Items>");
                let _ = write!(items, "<ErrorCode>{}</ErrorCode>", m.error_code.as_i32());
                items.push_str("</Items>");
                (MessageType::CancelTaskResponse, m.timestamp.clone(), items)
            }
            Message::QueryStatusResponse(m) => {
                let mut items = String::new();
                items.push_str("<Items>");
                let _ = write!(items, "<Value>{}</Value>", m.value);
                let _ = write!(items, "<Status>{}</Status>", m.status.as_i32());
                let _ = write!(items, "<ErrorCode>{}</ErrorCode>", m.error_code.as_i32());
                items.push_str("</Items>");
                (MessageType::QueryStatusResponse, m.timestamp.clone(), items)
            }
            Message::GetRealTimeStatusResponse(m) => {
                let mut items = String::new();
                items.push_str("<Items>");
                let _ = write!(items, "<PosX>{}</PosX>", m.pos_x);
                let _ = write!(items, "<PosY>{}</PosY>", m.pos_y);
                let _ = write!(items, "<PosZ>{}</PosZ>", m.pos_z);
                let _ = write!(items, "<SumOdom>{}</SumOdom>", m.sum_odom);
                let _ = write!(items, "<Location>{}</Location>", m.location.as_i32());
                items.push_str("</Items>");
                (MessageType::GetRealTimeStatusResponse, m.timestamp.clone(), items)
            }
            Message::ProcedureReset => {
                unreachable!("PROCEDURE_RESET never crosses the wire")
            }
        };
        let _ = write!(
            body,
            "<PatrolDevice><Type>{}</Type><Command>1</Command><Time>{}</Time>{}</PatrolDevice>",
            ty.wire_value(),
            time,
            items_xml
        );
        body
    }

    pub fn parse(message_type: MessageType, xml: &str) -> Result<Self> {
        let parsed = parse_envelope(xml)?;
        if parsed.message_type_raw != message_type.wire_value() {
            tracing::debug!(
                header_id = message_type.wire_value(),
                body_type = parsed.message_type_raw,
                "message body Type field disagrees with header message id"
            );
        }
        let time = parsed.time;
        Ok(match message_type {
            MessageType::NavigationTaskRequest => {
                let points = parsed
                    .items
                    .iter()
                    .map(NavigationPoint::from_item)
                    .collect::<Result<Vec<_>>>()?;
                Message::NavigationTaskRequest(NavigationTaskRequest { points, timestamp: time })
            }
            MessageType::CancelTaskRequest => {
                Message::CancelTaskRequest(CancelTaskRequest { timestamp: time })
            }
            MessageType::QueryStatusRequest => {
                Message::QueryStatusRequest(QueryStatusRequest { timestamp: time })
            }
            MessageType::GetRealTimeStatusRequest => {
                Message::GetRealTimeStatusRequest(GetRealTimeStatusRequest { timestamp: time })
            }
            MessageType::NavigationTaskResponse => {
                let item = parsed.items.first().cloned().unwrap_or_default();
                Message::NavigationTaskResponse(NavigationTaskResponse {
                    value: xml::field_i32(&item, "Value")?,
                    error_code: ErrorCode::from_i32(xml::field_i32(&item, "ErrorCode")?),
                    error_status: xml::field_i32(&item, "ErrorStatus")?,
                    timestamp: time,
                })
            }
            MessageType::CancelTaskResponse => {
                let item = parsed.items.first().cloned().unwrap_or_default();
                Message::CancelTaskResponse(CancelTaskResponse {
                    error_code: ErrorCode::from_i32(xml::field_i32(&item, "ErrorCode")?),
                    timestamp: time,
                })
            }
            MessageType::QueryStatusResponse => {
                let item = parsed.items.first().cloned().unwrap_or_default();
                Message::QueryStatusResponse(QueryStatusResponse {
                    status: NavStatus::from_i32(xml::field_i32(&item, "Status")?),
                    value: xml::field_i32(&item, "Value")?,
                    error_code: ErrorCode::from_i32(xml::field_i32(&item, "ErrorCode")?),
                    timestamp: time,
                })
            }
            MessageType::GetRealTimeStatusResponse => {
                let item = parsed.items.first().cloned().unwrap_or_default();
                Message::GetRealTimeStatusResponse(GetRealTimeStatusResponse {
                    pos_x: xml::field_f64(&item, "PosX")?,
                    pos_y: xml::field_f64(&item, "PosY")?,
                    pos_z: xml::field_f64(&item, "PosZ")?,
                    sum_odom: xml::field_f64(&item, "SumOdom")?,
                    location: Location::from_i32(xml::field_i32(&item, "Location")?),
                    timestamp: time,
                })
            }
        })
    }
}

impl NavigationTaskRequest {
    pub fn new(points: Vec<NavigationPoint>) -> Self {
        Self { points, timestamp: now_timestamp() }
    }
}

impl CancelTaskRequest {
    pub fn new() -> Self {
        Self { timestamp: now_timestamp() }
    }
}

impl Default for CancelTaskRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryStatusRequest {
    pub fn new() -> Self {
        Self { timestamp: now_timestamp() }
    }
}

impl Default for QueryStatusRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl GetRealTimeStatusRequest {
    pub fn new() -> Self {
        Self { timestamp: now_timestamp() }
    }
}

impl Default for GetRealTimeStatusRequest {
    fn default() -> Self {
        Self::new()
    }
}
