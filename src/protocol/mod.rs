//! Gateway wire protocol
//!
//! Opcodes, frames, handshake payloads and the close-code policy.

pub mod close;
pub mod frame;
pub mod opcode;

pub use close::{codes, CloseClass, CloseCodeTable, CloseInfo};
pub use frame::{
    events, ConnectionProperties, GatewayFrame, HelloPayload, IdentifyPayload, ReadyPayload,
    ResumePayload,
};
pub use opcode::OpCode;
