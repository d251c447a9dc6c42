use std::sync::Arc;
use std::thread;

use anyhow::Result;
use esp_idf_svc::hal::{delay::FreeRtos, modem::Modem};
use esp_idf_svc::{
	eventloop::EspSystemEventLoop,
	nvs::EspDefaultNvsPartition,
	wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};
use log::*;

use crate::constants::*;
use crate::events::PipelineEvents;

pub fn init_nvs() -> Result<EspDefaultNvsPartition> {
	let nvs = EspDefaultNvsPartition::take()?;
	info!("NVS partition ready");
	Ok(nvs)
}

pub fn init_wifi_station(
	modem: Modem,
	sysloop: EspSystemEventLoop,
	nvs: EspDefaultNvsPartition,
) -> Result<BlockingWifi<EspWifi<'static>>> {
	let mut wifi = BlockingWifi::wrap(EspWifi::new(modem, sysloop.clone(), Some(nvs))?, sysloop)?;

	let auth_method = if WIFI_PASSWORD.is_empty() {
		AuthMethod::None
	} else {
		AuthMethod::WPA2Personal
	};
	wifi.set_configuration(&Configuration::Client(ClientConfiguration {
		ssid: WIFI_SSID
			.try_into()
			.map_err(|_| anyhow::anyhow!("SSID `{}` is too long", WIFI_SSID))?,
		password: WIFI_PASSWORD
			.try_into()
			.map_err(|_| anyhow::anyhow!("Wi-Fi password is too long"))?,
		auth_method,
		..Default::default()
	}))?;

	wifi.start()?;
	info!("Wi-Fi station started, joining `{}`", WIFI_SSID);

	Ok(wifi)
}

fn associate(wifi: &mut BlockingWifi<EspWifi<'static>>) -> Result<()> {
	wifi.connect()?;
	wifi.wait_netif_up()?;
	Ok(())
}

/// Keeps the station associated and reports every transition to `events`.
pub fn spawn_wifi_thread(
	modem: Modem,
	sysloop: EspSystemEventLoop,
	nvs: EspDefaultNvsPartition,
	events: Arc<dyn PipelineEvents>,
) -> Result<()> {
	let wifi_thread_builder = thread::Builder::new()
		.stack_size(8192)
		.name("Wi-Fi Station".into());

	wifi_thread_builder.spawn(move || {
		let mut wifi = match init_wifi_station(modem, sysloop, nvs) {
			Ok(wifi) => wifi,
			Err(e) => {
				error!("Failed to initialise Wi-Fi station: {:?}", e);
				return;
			}
		};

		loop {
			match wifi.is_connected() {
				Ok(true) => events.on_connected(),
				_ => {
					events.on_disconnected();
					match associate(&mut wifi) {
						Ok(()) => {
							info!("Wi-Fi associated with `{}`", WIFI_SSID);
							events.on_connected();
						}
						Err(e) => warn!("Wi-Fi association failed: {:?}", e),
					}
				}
			}
			FreeRtos::delay_ms(1000);
		}
	})?;
	Ok(())
}
