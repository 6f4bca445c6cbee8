//! Wire protocol for the braid control socket.
//!
//! Connections carry length-prefixed frames: a little-endian `u32` byte
//! count followed by a JSON body. Requests name an opcode and carry an
//! opaque JSON payload; the dispatcher routes on the opcode and never
//! inspects the payload itself. Opcode semantics may only be extended
//! additively across versions.

pub mod frame;
pub mod ops;

pub use frame::{FrameError, MAX_FRAME_LEN, read_frame, write_frame};
pub use ops::{
    HealthReport, HealthState, Opcode, PROTOCOL_VERSION, Request, Response, is_compatible,
};
