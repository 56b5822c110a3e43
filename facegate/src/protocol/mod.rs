//! 设备协议模块
//! Device protocol module

pub mod message;

pub use message::{
  InboundFrame, Method, PersonChanges, PersonEntry, PushFrame, PushMethod, Response, ResultCode,
};
