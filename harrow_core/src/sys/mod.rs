//! Per-OS static syscall lists.

pub mod linux;
