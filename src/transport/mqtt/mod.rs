// src/transport/mqtt/mod.rs

//! MQTT overlay backend (`rumqttc`), available behind the
//! `transport_mqtt` feature.

mod overlay;

pub use overlay::{create_overlay, MqttOverlay};
