//! Hardware stream ownership
//!
//! cpal streams are not `Send`, so they are built and owned by a dedicated
//! thread that parks until shutdown. The control thread gets the open
//! result back over a channel before the start call returns; stream errors
//! reported later by cpal surface on a bounded error channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver};

use crate::audio::device::{default_input_device, default_output_device};
use crate::constants::STREAM_POLL_INTERVAL_MS;
use crate::error::AudioError;

/// Negotiated stream parameters shared by the input and output paths.
#[derive(Debug, Clone, Copy)]
pub struct StreamSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamSpec {
    fn config(&self) -> cpal::StreamConfig {
        cpal::StreamConfig {
            channels: self.channels,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        }
    }
}

/// Handle to the thread owning the hardware streams.
pub struct DuplexStreams {
    alive: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    error_rx: Receiver<AudioError>,
}

impl DuplexStreams {
    /// Open the output stream (and the input stream when `input_cb` is
    /// given) on a dedicated thread. Blocks until the streams have started
    /// or failed; on failure nothing is left running.
    ///
    /// The input callback runs on the capture thread and receives raw
    /// interleaved f32 samples; the output callback is the engine's sole
    /// real-time entry point.
    pub fn open(
        spec: StreamSpec,
        mut output_cb: impl FnMut(&mut [f32]) + Send + 'static,
        input_cb: Option<impl FnMut(&[f32]) + Send + 'static>,
    ) -> Result<Self, AudioError> {
        let output_device = default_output_device()?;
        let input_device = if input_cb.is_some() {
            Some(default_input_device()?)
        } else {
            None
        };

        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_loop = alive.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let (error_tx, error_rx) = bounded::<AudioError>(16);
        let config = spec.config();

        let handle = thread::Builder::new()
            .name("audio-streams".into())
            .spawn(move || {
                let stream_err =
                    |e: &dyn std::fmt::Display| AudioError::StreamError(e.to_string());

                let output_err_tx = error_tx.clone();
                let output_stream = match output_device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| output_cb(data),
                    move |err| {
                        tracing::error!("output stream error: {err}");
                        let _ = output_err_tx.try_send(AudioError::StreamError(err.to_string()));
                    },
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(stream_err(&e)));
                        return;
                    }
                };

                let input_stream = match (input_device, input_cb) {
                    (Some(device), Some(mut cb)) => {
                        let input_err_tx = error_tx.clone();
                        match device.build_input_stream(
                            &config,
                            move |data: &[f32], _: &cpal::InputCallbackInfo| cb(data),
                            move |err| {
                                tracing::error!("input stream error: {err}");
                                let _ = input_err_tx
                                    .try_send(AudioError::StreamError(err.to_string()));
                            },
                            None,
                        ) {
                            Ok(stream) => Some(stream),
                            Err(e) => {
                                let _ = ready_tx.send(Err(stream_err(&e)));
                                return;
                            }
                        }
                    }
                    _ => None,
                };

                // Start input before output so the first output callback can
                // already observe captured samples.
                if let Some(stream) = &input_stream {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(stream_err(&e)));
                        return;
                    }
                }
                if let Err(e) = output_stream.play() {
                    let _ = ready_tx.send(Err(stream_err(&e)));
                    return;
                }

                let _ = ready_tx.send(Ok(()));

                while alive_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(STREAM_POLL_INTERVAL_MS));
                }
                // Streams are dropped here, stopping the callbacks.
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                alive,
                handle: Some(handle),
                error_rx,
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                // The stream thread died before reporting.
                let _ = handle.join();
                Err(AudioError::StreamError(
                    "stream thread exited during open".to_string(),
                ))
            }
        }
    }

    /// Most recent asynchronous stream error, if any.
    pub fn take_error(&self) -> Option<AudioError> {
        self.error_rx.try_recv().ok()
    }

    /// Stop and join the stream thread, closing both streams.
    pub fn shutdown(mut self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DuplexStreams {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
