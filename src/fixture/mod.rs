//! Per-case execution context with scoped resources and verification.
//!
//! A [`Fixture`] owns a shared device handle, the case's parameters, a
//! recorder accumulating expectation results, and the scope of every
//! resource the case creates. Resources are released exactly once when the
//! case ends, on every exit path - an explicit [`finalize`] in the runner
//! plus a `Drop` guard for early exits.
//!
//! The verification engine lives here as well: exact byte comparison and
//! inclusive tolerance-range comparison, both observing device results
//! through one asynchronous readback (submit a copy, await the mapping,
//! then read).
//!
//! [`finalize`]: Fixture::finalize

use crate::device::{
    BufferId, BufferUsage, CommandEncoder, DeviceHandle, MapState, PipelineId,
    RenderPipelineDescriptor, TextureDescriptor, TextureId,
};
use crate::error::{Error, Result};
use crate::params::CaseParams;
use std::fmt;

// ---------------------------------------------------------------------------
// Expectations and outcomes
// ---------------------------------------------------------------------------

/// Result of a single recorded check.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    Passed { description: String },
    Failed { description: String },
}

/// Final verdict of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseOutcome {
    Pass,
    Fail,
    Skip,
}

impl fmt::Display for CaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaseOutcome::Pass => write!(f, "PASS"),
            CaseOutcome::Fail => write!(f, "FAIL"),
            CaseOutcome::Skip => write!(f, "SKIP"),
        }
    }
}

/// Accumulates expectation results for one case.
///
/// The verdict is a pure reduction over the recorded results: any failure
/// makes the case fail; assertion failures never abort remaining checks.
#[derive(Debug, Default)]
pub struct CaseRecorder {
    expectations: Vec<Expectation>,
}

impl CaseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pass(&mut self, description: impl Into<String>) {
        self.expectations.push(Expectation::Passed {
            description: description.into(),
        });
    }

    pub fn fail(&mut self, description: impl Into<String>) {
        let description = description.into();
        tracing::warn!(%description, "expectation failed");
        self.expectations.push(Expectation::Failed { description });
    }

    pub fn expectations(&self) -> &[Expectation] {
        &self.expectations
    }

    /// Diagnostics of every failed expectation, in record order.
    pub fn failures(&self) -> Vec<String> {
        self.expectations
            .iter()
            .filter_map(|e| match e {
                Expectation::Failed { description } => Some(description.clone()),
                Expectation::Passed { .. } => None,
            })
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.expectations
            .iter()
            .any(|e| matches!(e, Expectation::Failed { .. }))
    }

    pub fn verdict(&self) -> CaseOutcome {
        if self.has_failures() {
            CaseOutcome::Fail
        } else {
            CaseOutcome::Pass
        }
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

/// Lifecycle of a fixture; transitions are forward-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureState {
    /// Device handle bound, no resources yet.
    Created,
    /// One or more scoped resources created.
    Active,
    /// Resource release in progress.
    Finalizing,
    /// Resources released; the fixture is inert.
    Disposed,
}

#[derive(Debug, Clone, Copy)]
enum ScopedResource {
    Buffer(BufferId),
    Texture(TextureId),
    Pipeline(PipelineId),
}

/// The unit-of-execution context for a single case.
pub struct Fixture {
    device: DeviceHandle,
    params: CaseParams,
    rec: CaseRecorder,
    scope: Vec<ScopedResource>,
    state: FixtureState,
}

impl Fixture {
    pub fn new(device: DeviceHandle, params: CaseParams) -> Self {
        Self {
            device,
            params,
            rec: CaseRecorder::new(),
            scope: Vec::new(),
            state: FixtureState::Created,
        }
    }

    pub fn params(&self) -> &CaseParams {
        &self.params
    }

    pub fn state(&self) -> FixtureState {
        self.state
    }

    pub fn recorder(&self) -> &CaseRecorder {
        &self.rec
    }

    pub fn recorder_mut(&mut self) -> &mut CaseRecorder {
        &mut self.rec
    }

    /// Record a failed expectation.
    pub fn fail(&mut self, description: impl Into<String>) {
        self.rec.fail(description);
    }

    /// Number of resources currently held in the case scope.
    pub fn scoped_resource_count(&self) -> usize {
        self.scope.len()
    }

    fn activate(&mut self) {
        if self.state == FixtureState::Created {
            self.state = FixtureState::Active;
        }
    }

    // -- scoped resource creation ---------------------------------------------

    /// Create a zero-filled buffer scoped to this case.
    pub fn create_buffer(&mut self, size: u64, usage: BufferUsage) -> Result<BufferId> {
        let id = self.device.borrow_mut().create_buffer(size, usage)?;
        self.scope.push(ScopedResource::Buffer(id));
        self.activate();
        Ok(id)
    }

    /// Create a buffer scoped to this case, initialized with `data`.
    pub fn create_buffer_with_data(&mut self, data: &[u8], usage: BufferUsage) -> Result<BufferId> {
        let id = self.device.borrow_mut().create_buffer_with_data(data, usage)?;
        self.scope.push(ScopedResource::Buffer(id));
        self.activate();
        Ok(id)
    }

    /// Create a buffer initialized with little-endian `f32` values.
    pub fn create_buffer_with_f32(&mut self, values: &[f32], usage: BufferUsage) -> Result<BufferId> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.create_buffer_with_data(&bytes, usage)
    }

    /// Create a buffer initialized with little-endian `u32` values.
    pub fn create_buffer_with_u32(&mut self, values: &[u32], usage: BufferUsage) -> Result<BufferId> {
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.create_buffer_with_data(&bytes, usage)
    }

    /// Create a texture scoped to this case.
    pub fn create_texture(&mut self, desc: &TextureDescriptor) -> Result<TextureId> {
        let id = self.device.borrow_mut().create_texture(desc)?;
        self.scope.push(ScopedResource::Texture(id));
        self.activate();
        Ok(id)
    }

    /// Create a render pipeline scoped to this case.
    pub fn create_render_pipeline(
        &mut self,
        descriptor: RenderPipelineDescriptor,
    ) -> Result<PipelineId> {
        let id = self.device.borrow_mut().create_render_pipeline(descriptor)?;
        self.scope.push(ScopedResource::Pipeline(id));
        self.activate();
        Ok(id)
    }

    /// Submit a finished command encoder to the device queue.
    pub fn submit(&mut self, encoder: CommandEncoder) -> Result<u64> {
        self.device.borrow_mut().submit(encoder.finish())
    }

    // -- verification engine ---------------------------------------------------

    /// Copy `len` bytes out of `src` into a fresh staging buffer, await the
    /// device-to-host transfer, and return the bytes.
    ///
    /// This is the single asynchronous suspension point of a verification:
    /// the staging memory is never read before the mapping resolves.
    fn readback_buffer(&mut self, src: BufferId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut device = self.device.borrow_mut();
        let staging =
            device.create_buffer(len as u64, BufferUsage::COPY_DST | BufferUsage::MAP_READ)?;
        let mut encoder = CommandEncoder::new();
        encoder.copy_buffer_to_buffer(src, offset, staging, 0, len as u64);
        device.submit(encoder.finish())?;

        let token = device.map_read_async(staging)?;
        loop {
            device.poll();
            if device.map_state(token)? == MapState::Ready {
                break;
            }
        }
        let bytes = device.read_mapped(token)?;
        device.destroy_buffer(staging)?;
        Ok(bytes)
    }

    /// Copy a single texel into a staging buffer and return its bytes.
    fn readback_texel(&mut self, texture: TextureId, x: u32, y: u32) -> Result<Vec<u8>> {
        let mut device = self.device.borrow_mut();
        let texel = device.texture_format(texture)?.bytes_per_texel();
        let staging =
            device.create_buffer(texel as u64, BufferUsage::COPY_DST | BufferUsage::MAP_READ)?;
        let mut encoder = CommandEncoder::new();
        encoder.copy_texture_to_buffer(texture, (x, y), (1, 1), staging, 0);
        device.submit(encoder.finish())?;

        let token = device.map_read_async(staging)?;
        loop {
            device.poll();
            if device.map_state(token)? == MapState::Ready {
                break;
            }
        }
        let bytes = device.read_mapped(token)?;
        device.destroy_buffer(staging)?;
        Ok(bytes)
    }

    /// Exact byte comparison of a buffer's contents against `expected`.
    ///
    /// Every mismatching index is recorded as its own failed expectation;
    /// the comparison never short-circuits, so one assertion surfaces the
    /// full discrepancy.
    pub fn expect_buffer_contents(&mut self, src: BufferId, expected: &[u8]) -> Result<()> {
        let actual = self.readback_buffer(src, 0, expected.len())?;
        let mut mismatched = false;
        for (i, (&exp, &got)) in expected.iter().zip(actual.iter()).enumerate() {
            if exp != got {
                mismatched = true;
                self.rec
                    .fail(format!("at [{}], expected {}, got {}", i, exp, got));
            }
        }
        if !mismatched {
            self.rec.pass(format!(
                "buffer {:?}: {} bytes match",
                src,
                expected.len()
            ));
        }
        Ok(())
    }

    /// Exact comparison of one texel against `expected` bytes.
    pub fn expect_single_pixel(
        &mut self,
        texture: TextureId,
        x: u32,
        y: u32,
        expected: &[u8],
    ) -> Result<()> {
        let actual = self.readback_texel(texture, x, y)?;
        if actual.len() != expected.len() {
            return Err(Error::usage(format!(
                "expected {} bytes for one texel, format has {}",
                expected.len(),
                actual.len()
            )));
        }
        let mut mismatched = false;
        for (i, (&exp, &got)) in expected.iter().zip(actual.iter()).enumerate() {
            if exp != got {
                mismatched = true;
                self.rec.fail(format!(
                    "pixel ({}, {}) at [{}], expected {}, got {}",
                    x, y, i, exp, got
                ));
            }
        }
        if !mismatched {
            self.rec.pass(format!("pixel ({}, {}) matches", x, y));
        }
        Ok(())
    }

    /// Inclusive range check: passes iff `low[i] <= observed[i] <= high[i]`
    /// for every channel. The bounds are computed by the caller (typically
    /// `expected +/- tolerance`); the engine is bound-agnostic.
    pub fn expect_in_range(&mut self, label: &str, observed: &[f64], low: &[f64], high: &[f64]) {
        if observed.len() != low.len() || observed.len() != high.len() {
            self.rec.fail(format!(
                "{}: bound arity mismatch ({} observed, {} low, {} high)",
                label,
                observed.len(),
                low.len(),
                high.len()
            ));
            return;
        }
        let mut mismatched = false;
        for (i, &value) in observed.iter().enumerate() {
            if !(low[i] <= value && value <= high[i]) {
                mismatched = true;
                self.rec.fail(format!(
                    "{} channel [{}]: {} outside [{}, {}]",
                    label, i, value, low[i], high[i]
                ));
            }
        }
        if !mismatched {
            self.rec.pass(format!("{}: within bounds", label));
        }
    }

    /// Tolerance comparison of one float texel against per-channel bounds.
    pub fn expect_pixel_in_range(
        &mut self,
        texture: TextureId,
        x: u32,
        y: u32,
        low: &[f64; 4],
        high: &[f64; 4],
    ) -> Result<()> {
        let bytes = self.readback_texel(texture, x, y)?;
        if bytes.len() != 16 {
            return Err(Error::usage(
                "tolerance pixel checks require a float texture format",
            ));
        }
        let observed: Vec<f64> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect();
        self.expect_in_range(&format!("pixel ({}, {})", x, y), &observed, low, high);
        Ok(())
    }

    // -- lifecycle -------------------------------------------------------------

    /// Release every scoped resource. Runs exactly once; later calls and
    /// the `Drop` guard become no-ops.
    pub fn finalize(&mut self) {
        if matches!(self.state, FixtureState::Finalizing | FixtureState::Disposed) {
            return;
        }
        self.state = FixtureState::Finalizing;
        let mut device = self.device.borrow_mut();
        for resource in self.scope.drain(..).rev() {
            let released = match resource {
                ScopedResource::Buffer(id) => device.destroy_buffer(id),
                ScopedResource::Texture(id) => device.destroy_texture(id),
                ScopedResource::Pipeline(id) => device.destroy_pipeline(id),
            };
            if let Err(e) = released {
                tracing::warn!(error = %e, "failed to release scoped resource");
            }
        }
        self.state = FixtureState::Disposed;
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.finalize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{GpuDevice, TextureFormat, TextureUsage};

    fn fixture() -> Fixture {
        let device = GpuDevice::shared("Test GPU");
        Fixture::new(device, CaseParams::new())
    }

    // -- recorder --------------------------------------------------------------

    #[test]
    fn test_verdict_reduction() {
        let mut rec = CaseRecorder::new();
        assert_eq!(rec.verdict(), CaseOutcome::Pass);
        rec.pass("first check");
        assert_eq!(rec.verdict(), CaseOutcome::Pass);
        rec.fail("second check");
        rec.pass("third check");
        assert_eq!(rec.verdict(), CaseOutcome::Fail);
        assert_eq!(rec.failures(), vec!["second check".to_string()]);
    }

    // -- lifecycle -------------------------------------------------------------

    #[test]
    fn test_state_transitions() {
        let mut t = fixture();
        assert_eq!(t.state(), FixtureState::Created);
        t.create_buffer(16, BufferUsage::COPY_DST).unwrap();
        assert_eq!(t.state(), FixtureState::Active);
        t.finalize();
        assert_eq!(t.state(), FixtureState::Disposed);
    }

    #[test]
    fn test_finalize_releases_resources_exactly_once() {
        let device = GpuDevice::shared("Test GPU");
        let mut t = Fixture::new(device.clone(), CaseParams::new());
        t.create_buffer(16, BufferUsage::COPY_DST).unwrap();
        t.create_texture(&TextureDescriptor {
            format: TextureFormat::Rgba8Unorm,
            width: 4,
            height: 4,
            usage: TextureUsage::RENDER_ATTACHMENT,
        })
        .unwrap();
        assert_eq!(t.scoped_resource_count(), 2);

        t.finalize();
        {
            let dev = device.borrow();
            assert_eq!(dev.buffer_count(), 0);
            assert_eq!(dev.texture_count(), 0);
            assert_eq!(dev.stats.buffers_destroyed, 1);
            assert_eq!(dev.stats.textures_destroyed, 1);
        }

        // A second finalize (and the eventual drop) must not double-release.
        t.finalize();
        drop(t);
        let dev = device.borrow();
        assert_eq!(dev.stats.buffers_destroyed, 1);
        assert_eq!(dev.stats.textures_destroyed, 1);
    }

    #[test]
    fn test_drop_guard_releases_on_early_exit() {
        let device = GpuDevice::shared("Test GPU");
        {
            let mut t = Fixture::new(device.clone(), CaseParams::new());
            t.create_buffer(16, BufferUsage::COPY_DST).unwrap();
            // No finalize: the case "failed" before reaching it.
        }
        let dev = device.borrow();
        assert_eq!(dev.buffer_count(), 0);
        assert_eq!(dev.stats.buffers_destroyed, 1);
    }

    // -- exact comparison ------------------------------------------------------

    #[test]
    fn test_expect_buffer_contents_match() {
        let mut t = fixture();
        let src = t
            .create_buffer_with_data(&[0, 255, 0, 255], BufferUsage::COPY_SRC)
            .unwrap();
        t.expect_buffer_contents(src, &[0, 255, 0, 255]).unwrap();
        assert_eq!(t.recorder().verdict(), CaseOutcome::Pass);
    }

    #[test]
    fn test_expect_buffer_contents_reports_each_mismatch() {
        let mut t = fixture();
        let src = t
            .create_buffer_with_data(&[0, 255, 0, 254], BufferUsage::COPY_SRC)
            .unwrap();
        t.expect_buffer_contents(src, &[0, 255, 0, 255]).unwrap();
        let failures = t.recorder().failures();
        assert_eq!(failures, vec!["at [3], expected 255, got 254".to_string()]);
        assert_eq!(t.recorder().verdict(), CaseOutcome::Fail);
    }

    #[test]
    fn test_expect_buffer_contents_no_short_circuit() {
        let mut t = fixture();
        let src = t
            .create_buffer_with_data(&[9, 9, 9, 9], BufferUsage::COPY_SRC)
            .unwrap();
        t.expect_buffer_contents(src, &[0, 9, 0, 9]).unwrap();
        assert_eq!(t.recorder().failures().len(), 2);
    }

    // -- tolerance comparison --------------------------------------------------

    #[test]
    fn test_range_check_inclusive_bounds() {
        let mut t = fixture();
        t.expect_in_range("value", &[0.49], &[0.49], &[0.51]);
        t.expect_in_range("value", &[0.51], &[0.49], &[0.51]);
        t.expect_in_range("value", &[0.5001], &[0.49], &[0.51]);
        assert_eq!(t.recorder().verdict(), CaseOutcome::Pass);

        t.expect_in_range("value", &[0.52], &[0.49], &[0.51]);
        assert_eq!(t.recorder().verdict(), CaseOutcome::Fail);
    }

    #[test]
    fn test_range_check_arity_mismatch_fails() {
        let mut t = fixture();
        t.expect_in_range("value", &[0.5, 0.5], &[0.4], &[0.6]);
        assert!(t.recorder().has_failures());
    }

    // -- failure recording keeps going ----------------------------------------

    #[test]
    fn test_assertion_failures_do_not_abort_case() {
        let mut t = fixture();
        let src = t
            .create_buffer_with_data(&[1], BufferUsage::COPY_SRC)
            .unwrap();
        t.expect_buffer_contents(src, &[2]).unwrap();
        // A later check still runs and records.
        t.expect_buffer_contents(src, &[1]).unwrap();
        let expectations = t.recorder().expectations();
        assert_eq!(expectations.len(), 2);
        assert_eq!(t.recorder().verdict(), CaseOutcome::Fail);
    }
}
