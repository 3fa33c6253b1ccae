pub mod error;
pub mod header;
pub mod message;
pub mod procedure;
pub mod state;
mod xml;

pub use error::{ProtocolError, Result};
pub use header::{MessageType, ProtocolHeader, HEADER_LEN, SYNC_BYTES};
pub use message::{
    CancelTaskRequest, CancelTaskResponse, ErrorCode, GetRealTimeStatusRequest,
    GetRealTimeStatusResponse, Location, Message, NavStatus, NavigationPoint,
    NavigationTaskRequest, NavigationTaskResponse, QueryStatusRequest, QueryStatusResponse,
};
pub use procedure::{NavQueue, NavigationProcedure};
pub use state::{NavEvent, NavState, NavTransport, NavigationMachine};
