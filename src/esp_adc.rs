//! Continuous ADC driver and ISR-safe wake slot on ESP-IDF.

use std::ffi::c_void;
use std::ptr;
use std::sync::Arc;
use std::time::Duration;

use esp_idf_svc::sys::{self, esp, EspError};
use log::{error, info};

use crate::constants::{DEVICE_MAX_RATE_HZ, DEVICE_MIN_RATE_HZ};
use crate::error::PeripheralFault;
use crate::events::PipelineEvents;
use crate::peripheral::{AdcPeripheral, ConversionFormat, RateBounds};
use crate::signal::{timeout_ticks, CompletionSignal};

const QUEUE_TYPE_BINARY_SEMAPHORE: u8 = 3;
const QUEUE_SEND_TO_BACK: sys::BaseType_t = 0;

/// FreeRTOS binary semaphore, safe to give from interrupt context.
pub struct FreeRtosSemaphore {
	handle: sys::QueueHandle_t,
}

// The handle is only ever passed to FreeRTOS queue calls, which are thread safe.
unsafe impl Send for FreeRtosSemaphore {}
unsafe impl Sync for FreeRtosSemaphore {}

impl FreeRtosSemaphore {
	pub fn new() -> Result<Self, EspError> {
		let handle = unsafe { sys::xQueueGenericCreate(1, 0, QUEUE_TYPE_BINARY_SEMAPHORE) };
		if handle.is_null() {
			return Err(EspError::from_infallible::<{ sys::ESP_ERR_NO_MEM }>());
		}
		Ok(Self { handle })
	}
}

fn to_ticks(timeout: Option<Duration>) -> sys::TickType_t {
	timeout_ticks(timeout, sys::configTICK_RATE_HZ, sys::TickType_t::MAX)
}

impl CompletionSignal for FreeRtosSemaphore {
	fn notify(&self) -> bool {
		unsafe {
			if sys::xPortInIsrContext() != 0 {
				let mut woken: sys::BaseType_t = 0;
				sys::xQueueGiveFromISR(self.handle, &mut woken);
				woken != 0
			} else {
				sys::xQueueGenericSend(self.handle, ptr::null(), 0, QUEUE_SEND_TO_BACK);
				false
			}
		}
	}

	fn wait(&self, timeout: Option<Duration>) -> bool {
		unsafe { sys::xQueueSemaphoreTake(self.handle, to_ticks(timeout)) != 0 }
	}

	fn clear(&self) {
		unsafe {
			sys::xQueueSemaphoreTake(self.handle, 0);
		}
	}
}

impl Drop for FreeRtosSemaphore {
	fn drop(&mut self) {
		unsafe { sys::vQueueDelete(self.handle) };
	}
}

#[link_section = ".iram1.adc_conv_done"]
unsafe extern "C" fn on_conv_done(
	_handle: sys::adc_continuous_handle_t,
	_edata: *const sys::adc_continuous_evt_data_t,
	user_data: *mut c_void,
) -> bool {
	let events = &*(user_data as *const Arc<dyn PipelineEvents>);
	events.on_complete()
}

fn fault(op: &'static str, code: sys::esp_err_t) -> Result<(), PeripheralFault> {
	if code == sys::ESP_OK {
		Ok(())
	} else {
		Err(PeripheralFault { op, code })
	}
}

/// ADC unit 1 in continuous mode on a single channel. Unit 2 interferes with Wi-Fi.
pub struct EspAdc {
	handle: sys::adc_continuous_handle_t,
	// Boxed so the pointer given to the driver as callback context stays put.
	events: Box<Arc<dyn PipelineEvents>>,
	channel: sys::adc_channel_t,
	rate_hz: u32,
	running: bool,
}

impl EspAdc {
	pub fn new(
		events: Arc<dyn PipelineEvents>,
		channel: sys::adc_channel_t,
		frame_bytes: u32,
	) -> Result<Self, EspError> {
		let handle_cfg = sys::adc_continuous_handle_cfg_t {
			max_store_buf_size: frame_bytes * 2,
			conv_frame_size: frame_bytes,
			..Default::default()
		};
		let mut handle: sys::adc_continuous_handle_t = ptr::null_mut();
		esp!(unsafe { sys::adc_continuous_new_handle(&handle_cfg, &mut handle) })?;

		let mut adc = Self {
			handle,
			events: Box::new(events),
			channel,
			rate_hz: DEVICE_MAX_RATE_HZ,
			running: false,
		};
		esp!(adc.apply_config(DEVICE_MAX_RATE_HZ))?;

		let callbacks = sys::adc_continuous_evt_cbs_t {
			on_conv_done: Some(on_conv_done),
			on_pool_ovf: None,
		};
		let user_data = &*adc.events as *const Arc<dyn PipelineEvents> as *mut c_void;
		esp!(unsafe {
			sys::adc_continuous_register_event_callbacks(adc.handle, &callbacks, user_data)
		})?;

		info!(
			"Continuous ADC ready on channel {} ({} byte frames)",
			channel, frame_bytes
		);
		Ok(adc)
	}

	fn apply_config(&mut self, rate_hz: u32) -> sys::esp_err_t {
		let mut pattern = sys::adc_digi_pattern_config_t {
			atten: sys::adc_atten_t_ADC_ATTEN_DB_12 as u8,
			channel: self.channel as u8,
			unit: sys::adc_unit_t_ADC_UNIT_1 as u8,
			bit_width: sys::adc_bitwidth_t_ADC_BITWIDTH_12 as u8,
		};
		let config = sys::adc_continuous_config_t {
			pattern_num: 1,
			adc_pattern: &mut pattern,
			sample_freq_hz: rate_hz,
			conv_mode: sys::adc_digi_convert_mode_t_ADC_CONV_SINGLE_UNIT_1,
			format: sys::adc_digi_output_format_t_ADC_DIGI_OUTPUT_FORMAT_TYPE2,
		};
		let code = unsafe { sys::adc_continuous_config(self.handle, &config) };
		if code == sys::ESP_OK {
			self.rate_hz = rate_hz;
		}
		code
	}
}

impl AdcPeripheral for EspAdc {
	fn rate_bounds(&self) -> RateBounds {
		RateBounds {
			min_hz: DEVICE_MIN_RATE_HZ,
			max_hz: DEVICE_MAX_RATE_HZ,
		}
	}

	fn format(&self) -> ConversionFormat {
		ConversionFormat::Type2
	}

	fn set_sample_rate(&mut self, rate_hz: u32) -> Result<(), PeripheralFault> {
		if rate_hz == self.rate_hz {
			return Ok(());
		}
		fault("config", self.apply_config(rate_hz))
	}

	fn start(&mut self) -> Result<(), PeripheralFault> {
		fault("start", unsafe { sys::adc_continuous_start(self.handle) })?;
		self.running = true;
		Ok(())
	}

	fn stop(&mut self) -> Result<(), PeripheralFault> {
		fault("stop", unsafe { sys::adc_continuous_stop(self.handle) })?;
		self.running = false;
		Ok(())
	}

	fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, PeripheralFault> {
		let mut read: u32 = 0;
		let code = unsafe {
			sys::adc_continuous_read(self.handle, buf.as_mut_ptr(), buf.len() as u32, &mut read, 0)
		};
		match code {
			sys::ESP_OK => Ok(read as usize),
			sys::ESP_ERR_TIMEOUT => Ok(0),
			code => Err(PeripheralFault { op: "read", code }),
		}
	}
}

impl Drop for EspAdc {
	fn drop(&mut self) {
		if self.running {
			if let Err(e) = self.stop() {
				error!("Failed to stop ADC on drop: {}", e);
			}
		}
		unsafe { sys::adc_continuous_deinit(self.handle) };
	}
}
