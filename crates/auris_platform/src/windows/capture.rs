//! Per-process WASAPI loopback capture.
//!
//! Captures the audio rendered by a single process (and its child processes)
//! using `AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS` via `ActivateAudioInterfaceAsync`,
//! available on Windows 10 build 19041+. The stream comes back as interleaved
//! float32 at whatever mix format the default render endpoint uses; callers
//! convert to PCM16LE downstream.

use crate::error::PlatformError;
use std::sync::{Arc, Condvar, Mutex};

#[cfg(target_os = "windows")]
mod imp {
    use super::*;
    use windows::core::{implement, Interface, GUID};
    use windows::Win32::Foundation::{CloseHandle, HANDLE};
    use windows::Win32::Media::Audio::{
        eConsole, eRender, AudioClient, IAudioCaptureClient, IActivateAudioInterfaceAsyncOperation,
        IActivateAudioInterfaceCompletionHandler, IActivateAudioInterfaceCompletionHandler_Impl,
        IAudioClient, IMMDeviceEnumerator, MMDeviceEnumerator, AUDCLNT_STREAMFLAGS_LOOPBACK,
        AUDIOCLIENT_ACTIVATION_PARAMS, AUDIOCLIENT_ACTIVATION_PARAMS_0,
        AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK, AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS,
        AUDIOCLIENT_SHAREMODE_SHARED, PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
        WAVEFORMATEX,
    };
    use windows::Win32::System::Com::{
        CoCreateInstance, StructuredStorage::PROPVARIANT, CLSCTX_ALL, CLSCTX_INPROC_SERVER,
    };
    use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject, INFINITE};

    const VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK: &str =
        "VAD\\Process_Loopback";

    #[implement(IActivateAudioInterfaceCompletionHandler)]
    struct CompletionHandler {
        signal: Arc<(Mutex<Option<windows::core::Result<IAudioClient>>>, Condvar)>,
    }

    impl IActivateAudioInterfaceCompletionHandler_Impl for CompletionHandler_Impl {
        fn ActivateCompleted(
            &self,
            operation: Option<&IActivateAudioInterfaceAsyncOperation>,
        ) -> windows::core::Result<()> {
            let result = (|| -> windows::core::Result<IAudioClient> {
                let operation = operation.ok_or_else(|| {
                    windows::core::Error::from_win32()
                })?;
                let mut hr = windows::Win32::Foundation::S_OK;
                let mut iface: Option<windows::core::IUnknown> = None;
                unsafe { operation.GetActivateResult(&mut hr, &mut iface)? };
                hr.ok()?;
                let iface = iface.ok_or_else(windows::core::Error::from_win32)?;
                iface.cast::<IAudioClient>()
            })();

            let (lock, cvar) = &*self.signal;
            let mut guard = lock.lock().unwrap();
            *guard = Some(result);
            cvar.notify_all();
            Ok(())
        }
    }

    /// Activates an `IAudioClient` bound to a single process's render stream,
    /// blocking the calling thread until activation completes.
    fn activate_process_loopback_client(pid: u32) -> windows::core::Result<IAudioClient> {
        let mut loopback_params = AUDIOCLIENT_PROCESS_LOOPBACK_PARAMS {
            TargetProcessId: pid,
            ProcessLoopbackMode: PROCESS_LOOPBACK_MODE_INCLUDE_TARGET_PROCESS_TREE,
        };

        let mut activation_params = AUDIOCLIENT_ACTIVATION_PARAMS {
            ActivationType: AUDIOCLIENT_ACTIVATION_TYPE_PROCESS_LOOPBACK,
            Anonymous: AUDIOCLIENT_ACTIVATION_PARAMS_0 {
                ProcessLoopbackParams: loopback_params,
            },
        };

        let prop = PROPVARIANT::from(&mut activation_params as *mut _ as *mut std::ffi::c_void);

        let signal = Arc::new((Mutex::new(None), Condvar::new()));
        let handler: IActivateAudioInterfaceCompletionHandler = CompletionHandler {
            signal: signal.clone(),
        }
        .into();

        let device_id = windows::core::HSTRING::from(VIRTUAL_AUDIO_DEVICE_PROCESS_LOOPBACK);
        unsafe {
            windows::Win32::Media::Audio::ActivateAudioInterfaceAsync(
                &device_id,
                &IAudioClient::IID,
                Some(&prop as *const _ as *const _),
                &handler,
            )?;
        }

        let (lock, cvar) = &*signal;
        let mut guard = lock.lock().unwrap();
        while guard.is_none() {
            guard = cvar.wait(guard).unwrap();
        }
        let _ = loopback_params; // keep params alive until activation completes
        guard.take().unwrap()
    }

    pub struct ProcessLoopbackCapture {
        client: IAudioClient,
        capture_client: IAudioCaptureClient,
        event_handle: HANDLE,
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
    }

    impl ProcessLoopbackCapture {
        pub fn new(pid: u32) -> Result<Self, PlatformError> {
            let version = super::version::WindowsVersion::current()?;
            if !version.supports_process_loopback() {
                return Err(PlatformError::FeatureNotAvailable(format!(
                    "process loopback capture requires Windows 10 build {}+ (20H1), running {}",
                    super::version::WindowsVersion::MIN_PROCESS_LOOPBACK_BUILD,
                    version,
                )));
            }

            let client = activate_process_loopback_client(pid)
                .map_err(|e| PlatformError::InitializationFailed(format!(
                    "ActivateAudioInterfaceAsync for pid {} failed: {}", pid, e
                )))?;

            let wave_format = default_mix_format()?;

            unsafe {
                client.Initialize(
                    AUDIOCLIENT_SHAREMODE_SHARED,
                    AUDCLNT_STREAMFLAGS_LOOPBACK,
                    200_000, // 20ms buffer, hns units
                    0,
                    &wave_format as *const WAVEFORMATEX,
                    None,
                ).map_err(|e| PlatformError::InitializationFailed(format!(
                    "IAudioClient::Initialize failed: {}", e
                )))?;
            }

            let event_handle = unsafe {
                CreateEventW(None, false, false, None).map_err(|e| {
                    PlatformError::InitializationFailed(format!("CreateEventW failed: {}", e))
                })?
            };
            unsafe {
                client.SetEventHandle(event_handle).map_err(|e| {
                    PlatformError::InitializationFailed(format!("SetEventHandle failed: {}", e))
                })?;
            }

            let capture_client: IAudioCaptureClient = unsafe {
                client.GetService().map_err(|e| PlatformError::InitializationFailed(format!(
                    "GetService(IAudioCaptureClient) failed: {}", e
                )))?
            };

            unsafe {
                client.Start().map_err(|e| PlatformError::InitializationFailed(format!(
                    "IAudioClient::Start failed: {}", e
                )))?;
            }

            Ok(Self {
                client,
                capture_client,
                event_handle,
                channels: wave_format.nChannels,
                sample_rate: wave_format.nSamplesPerSec,
                bits_per_sample: wave_format.wBitsPerSample,
            })
        }

        pub fn channels(&self) -> u16 {
            self.channels
        }

        pub fn sample_rate(&self) -> u32 {
            self.sample_rate
        }

        pub fn bits_per_sample(&self) -> u16 {
            self.bits_per_sample
        }

        /// Block until the event signals data is ready, then drain all
        /// pending packets into `out` as interleaved float32 bytes.
        pub fn read_blocking(&mut self, out: &mut Vec<u8>) -> Result<(), PlatformError> {
            unsafe { WaitForSingleObject(self.event_handle, INFINITE) };

            loop {
                let next = unsafe {
                    self.capture_client.GetNextPacketSize().map_err(|e| {
                        PlatformError::Internal(format!("GetNextPacketSize failed: {}", e))
                    })?
                };
                if next == 0 {
                    break;
                }

                let mut data_ptr: *mut u8 = std::ptr::null_mut();
                let mut frames_available = 0u32;
                let mut flags = 0u32;
                unsafe {
                    self.capture_client
                        .GetBuffer(&mut data_ptr, &mut frames_available, &mut flags, None, None)
                        .map_err(|e| PlatformError::Internal(format!("GetBuffer failed: {}", e)))?;
                }

                let frame_bytes = (self.channels as usize) * (self.bits_per_sample as usize / 8);
                let byte_len = frames_available as usize * frame_bytes;
                if !data_ptr.is_null() && byte_len > 0 {
                    let slice = unsafe { std::slice::from_raw_parts(data_ptr, byte_len) };
                    out.extend_from_slice(slice);
                }

                let _ = unsafe { self.capture_client.ReleaseBuffer(frames_available) };
            }

            Ok(())
        }
    }

    impl Drop for ProcessLoopbackCapture {
        fn drop(&mut self) {
            let _ = unsafe { self.client.Stop() };
            unsafe {
                let _ = CloseHandle(self.event_handle);
            }
        }
    }

    fn default_mix_format() -> Result<WAVEFORMATEX, PlatformError> {
        // Process-loopback endpoints don't expose a mix format of their own;
        // query the default render endpoint's so channel/rate interpretation
        // matches what proctap-style tools observe in practice (float32 stereo).
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL | CLSCTX_INPROC_SERVER)
                    .map_err(|e| PlatformError::InitializationFailed(format!(
                        "CoCreateInstance(MMDeviceEnumerator) failed: {}", e
                    )))?;
            let device = enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|e| PlatformError::InitializationFailed(format!(
                    "GetDefaultAudioEndpoint failed: {}", e
                )))?;
            let client: IAudioClient = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| PlatformError::InitializationFailed(format!(
                    "IMMDevice::Activate failed: {}", e
                )))?;
            let format_ptr = client
                .GetMixFormat()
                .map_err(|e| PlatformError::InitializationFailed(format!(
                    "GetMixFormat failed: {}", e
                )))?;
            Ok(*format_ptr)
        }
    }
}

#[cfg(target_os = "windows")]
pub use imp::ProcessLoopbackCapture;

#[cfg(not(target_os = "windows"))]
pub struct ProcessLoopbackCapture;

#[cfg(not(target_os = "windows"))]
impl ProcessLoopbackCapture {
    pub fn new(_pid: u32) -> Result<Self, PlatformError> {
        Err(PlatformError::FeatureNotAvailable(
            "process loopback capture only available on Windows".into(),
        ))
    }

    pub fn channels(&self) -> u16 {
        0
    }

    pub fn sample_rate(&self) -> u32 {
        0
    }

    pub fn bits_per_sample(&self) -> u16 {
        0
    }

    pub fn read_blocking(&mut self, _out: &mut Vec<u8>) -> Result<(), PlatformError> {
        Err(PlatformError::FeatureNotAvailable(
            "process loopback capture only available on Windows".into(),
        ))
    }
}

/// Clip to [-1.0, 1.0], quantize to int16, and preserve any trailing bytes
/// that don't form a complete frame for the next call.
pub fn float32le_to_pcm16le(raw: &[u8], channels: u16) -> (Vec<u8>, Vec<u8>) {
    if raw.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let frame_bytes_f32 = 4 * channels as usize;
    let aligned = (raw.len() / frame_bytes_f32) * frame_bytes_f32;
    if aligned == 0 {
        return (Vec::new(), raw.to_vec());
    }

    let (head, tail) = raw.split_at(aligned);
    let mut out = Vec::with_capacity(head.len() / 2);
    for chunk in head.chunks_exact(4) {
        let sample = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let clipped = sample.clamp(-1.0, 1.0);
        let scaled = (clipped * 32767.0) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
    (out, tail.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float32le_to_pcm16le_round_trip() {
        let samples: [f32; 4] = [0.0, 0.5, -0.5, 1.0];
        let mut raw = Vec::new();
        for s in samples {
            raw.extend_from_slice(&s.to_le_bytes());
        }

        let (pcm16, tail) = float32le_to_pcm16le(&raw, 2);
        assert!(tail.is_empty());
        assert_eq!(pcm16.len(), 8);

        let first = i16::from_le_bytes([pcm16[0], pcm16[1]]);
        assert_eq!(first, 0);
    }

    #[test]
    fn test_float32le_to_pcm16le_clips_out_of_range() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&2.0f32.to_le_bytes());
        raw.extend_from_slice(&(-2.0f32).to_le_bytes());
        let (pcm16, _tail) = float32le_to_pcm16le(&raw, 1);
        let first = i16::from_le_bytes([pcm16[0], pcm16[1]]);
        let second = i16::from_le_bytes([pcm16[2], pcm16[3]]);
        assert_eq!(first, 32767);
        assert_eq!(second, -32767);
    }

    #[test]
    fn test_float32le_to_pcm16le_preserves_tail() {
        let mut raw = 1.0f32.to_le_bytes().to_vec();
        raw.extend_from_slice(&[0xAA, 0xBB]); // 2 stray bytes, not a full frame
        let (pcm16, tail) = float32le_to_pcm16le(&raw, 1);
        assert_eq!(pcm16.len(), 2);
        assert_eq!(tail, vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_float32le_to_pcm16le_empty_input() {
        let (pcm16, tail) = float32le_to_pcm16le(&[], 2);
        assert!(pcm16.is_empty());
        assert!(tail.is_empty());
    }
}
