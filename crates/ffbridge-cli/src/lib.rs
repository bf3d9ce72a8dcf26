//! `ffbridge` CLI Library
//!
//! Shell front-end that serves a file or stdio through a bridge and prints
//! the endpoint URL for a media subprocess to open.

pub mod bridge_cmd;
