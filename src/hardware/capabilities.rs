//! Hardware capabilities polled by the acquisition loop.
//!
//! The loop only needs "give me one pressure reading", so it is written
//! against [`PressureGauge`] rather than the concrete controller. Tests and
//! alternative gauges implement the trait directly.

use crate::error::AppResult;
use crate::hardware::spce::RawPressure;
use async_trait::async_trait;

/// A device that produces one pressure reading per request.
///
/// Takes `&mut self`: one outstanding request per device session.
#[async_trait]
pub trait PressureGauge: Send {
    /// Read the current pressure as the instrument reports it.
    async fn read_pressure(&mut self) -> AppResult<RawPressure>;
}

#[async_trait]
impl<G: PressureGauge + ?Sized> PressureGauge for Box<G> {
    async fn read_pressure(&mut self) -> AppResult<RawPressure> {
        (**self).read_pressure().await
    }
}
