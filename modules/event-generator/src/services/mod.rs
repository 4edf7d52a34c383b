pub mod generation_service;

pub use generation_service::{
    EventGenerator, GenerationError, GenerationSwitch, MANUAL_EVENT, SYSTEM_EVENT,
};
