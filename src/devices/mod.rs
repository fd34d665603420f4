// MIT License - Copyright (c) 2026 telenot-bridge authors
// Decoded panel device state

pub mod security_area;

pub use security_area::SecurityAreaStatus;
