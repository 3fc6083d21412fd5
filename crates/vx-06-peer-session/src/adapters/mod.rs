//! Adapters: TCP framing for sealed session traffic.

pub mod framing;

pub use framing::{
    read_frame, read_preamble, spawn_reader, write_frame, write_frame_within, write_preamble,
    MAX_FRAME,
};
