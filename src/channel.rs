//! Logical DMX channels: named, contiguous slices of a universe.

use std::cell::RefCell;
use std::rc::Rc;

use crate::channel_fade::ChannelBoundFade;
use crate::error::{DmxError, Result};
use crate::fade::{FadeCurve, FadeState};
use crate::output_correction::{linear, CorrectionFn};
use crate::universe::{Universe, UniverseData};

/// Byte order used when a channel's samples are wider than one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Big,
    Little,
}

/// Internal state for one channel. Always owned by exactly one universe;
/// never shared outside the engine's own Rc graph except through the
/// public [`Channel`] handle.
pub(crate) struct ChannelData {
    pub(crate) start: u16, // 1-indexed
    pub(crate) width: usize,
    pub(crate) byte_size: u8,
    pub(crate) byte_order: ByteOrder,
    pub(crate) stop: u16,
    pub(crate) value_max: u32,
    pub(crate) values_raw: Vec<u32>,
    pub(crate) values_act: Vec<u32>,
    pub(crate) correction: Option<CorrectionFn>,
    pub(crate) current_fade: Option<ChannelBoundFade>,
    pub(crate) fade_finished_callback: Option<Box<dyn FnMut(&Channel)>>,
}

impl ChannelData {
    fn new(start: u16, width: usize, byte_size: u8, byte_order: ByteOrder) -> Result<Self> {
        if width == 0 {
            return Err(DmxError::ChannelWidthInvalid { width, byte_size });
        }
        if !(1..=4).contains(&byte_size) {
            return Err(DmxError::ChannelWidthInvalid { width, byte_size });
        }
        if start < 1 || start > 512 {
            return Err(DmxError::ChannelOutOfUniverse {
                start,
                width,
                byte_size,
            });
        }
        let total = width * byte_size as usize;
        let stop = start as usize + total - 1;
        if stop > 512 {
            return Err(DmxError::ChannelOutOfUniverse {
                start,
                width,
                byte_size,
            });
        }

        let value_max = 256u64.pow(byte_size as u32) as u32 - 1;
        Ok(ChannelData {
            start,
            width,
            byte_size,
            byte_order,
            stop: stop as u16,
            value_max,
            values_raw: vec![0; width],
            values_act: vec![0; width],
            correction: None,
            current_fade: None,
            fade_finished_callback: None,
        })
    }

    /// Resolve which correction function applies: this channel's own, else
    /// the universe's, else the node's, else [`linear`].
    fn resolve_correction(&self, universe: &UniverseData, node_correction: Option<CorrectionFn>) -> CorrectionFn {
        self.correction
            .or(universe.correction)
            .or(node_correction)
            .unwrap_or(linear)
    }

    fn recompute_act(&mut self, universe: &UniverseData, node_correction: Option<CorrectionFn>) -> bool {
        let correction = self.resolve_correction(universe, node_correction);
        let value_max = self.value_max;
        let mut changed = false;
        for i in 0..self.width {
            let act_new = correction(self.values_raw[i] as f64, value_max)
                .round()
                .clamp(0.0, value_max as f64) as u32;
            if self.values_act[i] != act_new {
                changed = true;
            }
            self.values_act[i] = act_new;
        }
        changed
    }

    /// Write `values_act` into `buf` at `(start - 1) + i * byte_size`,
    /// unsigned, in the channel's byte order.
    pub(crate) fn to_buffer(&self, buf: &mut [u8]) {
        let mut pos = (self.start - 1) as usize;
        let n = self.byte_size as usize;
        for &v in &self.values_act {
            let be = v.to_be_bytes();
            match self.byte_order {
                ByteOrder::Big => buf[pos..pos + n].copy_from_slice(&be[4 - n..]),
                ByteOrder::Little => {
                    let mut le = be;
                    le.reverse();
                    buf[pos..pos + n].copy_from_slice(&le[..n]);
                }
            }
            pos += n;
        }
    }
}

/// A named, contiguous slice of a universe: `width` logical samples of
/// `byte_size` bytes each, holding raw and output-corrected values and at
/// most one active fade.
///
/// Cheap to clone: internally an `Rc`-backed handle into the engine's
/// shared state, plus the `Universe` (and transitively the `Node`) it
/// belongs to. Keep at least one `Channel`/`Universe`/`Node` handle alive
/// for as long as you intend to use it — nothing elsewhere in the engine
/// holds it alive on your behalf once no fade is running on it.
#[derive(Clone)]
pub struct Channel {
    pub(crate) universe: Universe,
    pub(crate) data: Rc<RefCell<ChannelData>>,
}

impl Channel {
    pub(crate) fn construct(
        start: u16,
        width: usize,
        byte_size: u8,
        byte_order: ByteOrder,
    ) -> Result<Rc<RefCell<ChannelData>>> {
        let data = ChannelData::new(start, width, byte_size, byte_order)?;
        Ok(Rc::new(RefCell::new(data)))
    }

    pub(crate) fn from_parts(universe: Universe, data: Rc<RefCell<ChannelData>>) -> Self {
        Channel { universe, data }
    }

    /// 1-indexed DMX start position.
    pub fn start(&self) -> u16 {
        self.data.borrow().start
    }

    /// Number of logical samples.
    pub fn width(&self) -> usize {
        self.data.borrow().width
    }

    /// Highest DMX address this channel occupies (1-indexed, inclusive).
    pub fn stop(&self) -> u16 {
        self.data.borrow().stop
    }

    /// Largest representable raw/corrected value for this channel's byte size.
    pub fn value_max(&self) -> u32 {
        self.data.borrow().value_max
    }

    /// Copy of the current (uncorrected) channel values.
    pub fn get_values(&self) -> Vec<u32> {
        self.data.borrow().values_raw.clone()
    }

    /// Set values immediately, with no fade. `values.len()` must equal
    /// [`Channel::width`]; each value must lie in `[0, value_max]`.
    ///
    /// If the corrected output actually changes, marks the universe buffer
    /// dirty and makes sure the owning node's process task is running so
    /// the new values reach the wire on its next tick.
    pub fn set_values(&self, values: &[f64]) -> Result<()> {
        let changed = set_values_raw(&self.data, &self.universe.data, values)?;
        if changed {
            self.universe.ensure_process_task_running();
        }
        Ok(())
    }

    /// Cancel any current fade and schedule a new one toward `targets` over
    /// `duration_ms`. `targets.len()` must equal [`Channel::width`].
    ///
    /// Fails with a length-mismatch or value-out-of-bounds error before any
    /// state changes (spec invariant: validation precedes mutation).
    pub fn set_fade(&self, targets: &[f64], duration_ms: u64, curve: FadeCurve) -> Result<()> {
        let width = self.data.borrow().width;
        if targets.len() != width {
            return Err(DmxError::ValueCountDoesNotMatchChannelWidth {
                expected: width,
                got: targets.len(),
            });
        }
        let value_max = self.data.borrow().value_max;
        for &t in targets {
            if !(0.0..=value_max as f64).contains(&t) {
                return Err(DmxError::ChannelValueOutOfBounds {
                    value: t,
                    value_max,
                });
            }
        }

        if let Some(old) = self.data.borrow_mut().current_fade.take() {
            old.cancel();
        }

        let process_every_ms = self.universe.node.process_every_ms();
        let duration_ms = duration_ms.max(process_every_ms);
        let fade_steps = ((duration_ms as f64) / (process_every_ms as f64)).ceil() as u32;

        let fades: Vec<FadeState> = {
            let data = self.data.borrow();
            targets
                .iter()
                .enumerate()
                .map(|(i, &target)| FadeState::initialize(curve, data.values_raw[i] as f64, target, fade_steps))
                .collect()
        };

        tracing::debug!(
            start = self.start(),
            width = width,
            fade_steps,
            "scheduling fade"
        );

        let bound = ChannelBoundFade::new(&self.data, &self.universe.data, &self.universe.node, fades);
        self.data.borrow_mut().current_fade = Some(bound.clone());
        self.universe.node.push_process_job(bound);
        self.universe.ensure_process_task_running();
        Ok(())
    }

    /// Register a callback invoked once when the current fade completes
    /// naturally (not when cancelled by a subsequent `set_fade`).
    pub fn on_fade_finished(&self, callback: impl FnMut(&Channel) + 'static) {
        self.data.borrow_mut().fade_finished_callback = Some(Box::new(callback));
    }

    /// Set (or clear) this channel's own output correction, taking priority
    /// over the universe's and node's. Recomputes corrected values immediately.
    pub fn set_output_correction(&self, func: Option<CorrectionFn>) {
        self.data.borrow_mut().correction = func;
        self.apply_output_correction();
    }

    pub(crate) fn apply_output_correction(&self) {
        let node_correction = self.universe.node.correction();
        let universe = self.universe.data.borrow();
        let changed = self.data.borrow_mut().recompute_act(&universe, node_correction);
        drop(universe);
        if changed {
            let channel = self.data.borrow();
            let mut universe = self.universe.data.borrow_mut();
            channel.to_buffer(&mut universe.data);
            universe.data_changed = true;
        }
    }

    /// Resolves when the channel's current fade completes or is cancelled;
    /// resolves immediately if no fade is active.
    pub async fn awaited(&self) -> bool {
        let notify = {
            let data = self.data.borrow();
            match &data.current_fade {
                Some(fade) => fade.completion_notify(),
                None => return false,
            }
        };
        notify.notified().await;
        true
    }
}

impl std::future::IntoFuture for Channel {
    type Output = bool;
    type IntoFuture = std::pin::Pin<Box<dyn std::future::Future<Output = bool>>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.awaited().await })
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let data = self.data.borrow();
        write!(
            f,
            "Channel {{ start: {}, width: {}, bits: {} }}",
            data.start,
            data.width,
            data.byte_size * 8
        )
    }
}

/// Shared by [`Channel::set_values`] and the per-tick fade processing path:
/// validates and writes `values` into `values_raw`/`values_act`, and — if
/// any corrected sample changed — writes the channel's bytes into the
/// universe buffer and marks it dirty. Returns whether anything changed.
pub(crate) fn set_values_raw(
    channel_data: &Rc<RefCell<ChannelData>>,
    universe_data: &Rc<RefCell<UniverseData>>,
    values: &[f64],
) -> Result<bool> {
    let changed = {
        let mut data = channel_data.borrow_mut();
        if values.len() != data.width {
            return Err(DmxError::ValueCountDoesNotMatchChannelWidth {
                expected: data.width,
                got: values.len(),
            });
        }

        let value_max = data.value_max;
        let universe = universe_data.borrow();
        let correction = data.resolve_correction(&universe, None);
        drop(universe);

        let mut new_raw = Vec::with_capacity(data.width);
        let mut new_act = Vec::with_capacity(data.width);
        for &val in values {
            let raw_new = val.round();
            if raw_new < 0.0 || raw_new > value_max as f64 {
                return Err(DmxError::ChannelValueOutOfBounds { value: val, value_max });
            }
            new_raw.push(raw_new as u32);
            new_act.push(correction(val, value_max).round().clamp(0.0, value_max as f64) as u32);
        }

        let mut changed = false;
        for i in 0..data.width {
            if data.values_act[i] != new_act[i] {
                changed = true;
            }
        }
        data.values_raw = new_raw;
        data.values_act = new_act;
        changed
    };

    if changed {
        let channel = channel_data.borrow();
        let mut universe = universe_data.borrow_mut();
        channel.to_buffer(&mut universe.data);
        universe.data_changed = true;
    }

    Ok(changed)
}
