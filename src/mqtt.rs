use std::sync::Arc;

use esp_idf_svc::mqtt::client::{
	EspMqttClient, EspMqttEvent, EventPayload, MqttClientConfiguration, QoS,
};
use esp_idf_svc::sys::EspError;
use log::*;

use crate::error::{Error, Result};
use crate::events::PipelineEvents;
use crate::telemetry::TelemetrySink;

/// Publishes telemetry to an MQTT broker. Broker acknowledgements are routed
/// back through [`PipelineEvents::on_publish_ack`].
pub struct MqttSink {
	client: EspMqttClient<'static>,
}

impl MqttSink {
	pub fn new(
		url: &str,
		client_id: &str,
		events: Arc<dyn PipelineEvents>,
	) -> std::result::Result<Self, EspError> {
		let conf = MqttClientConfiguration {
			client_id: Some(client_id),
			..Default::default()
		};

		let client = EspMqttClient::new_cb(url, &conf, move |event: EspMqttEvent<'_>| {
			match event.payload() {
				EventPayload::Connected(_) => info!("MQTT session established"),
				EventPayload::Disconnected => warn!("MQTT session lost"),
				EventPayload::Published(id) => events.on_publish_ack(id, true),
				EventPayload::Deleted(id) => events.on_publish_ack(id, false),
				EventPayload::Error(e) => error!("MQTT error: {:?}", e),
				_ => {}
			}
		})?;

		info!("MQTT client created for {}", url);
		Ok(Self { client })
	}
}

impl TelemetrySink for MqttSink {
	fn publish(&mut self, topic: &str, payload: &str) -> Result<u32> {
		self.client
			.enqueue(topic, QoS::AtLeastOnce, false, payload.as_bytes())
			.map_err(|e| Error::Publish(e.to_string()))
	}
}
