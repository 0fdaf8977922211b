pub mod ports;
pub mod quality_gate_use_case;
pub mod verify_use_case;
