//! 控制面：类型化请求/响应与 ControlSurface 句柄

pub mod message;
pub mod surface;

pub use message::{
    ClearResponse, ClearStatus, ControlRequest, ControlResponse, ProgressResponse, StartResponse,
    StartStatus, StopResponse, StopStatus,
};
pub use surface::ControlSurface;
pub(crate) use surface::ControlCall;
