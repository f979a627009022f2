//! # System Interaction Layer
//!
//! The boundary between the stage engine and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns one command at a time through the host shell (`sh -c`, or
//!   `cmd.exe /E:ON /V:ON /C` on Windows) or through an interpreter (`python -c ...`),
//!   streaming its output to the terminal while capturing it for error reports.

pub mod executor;
