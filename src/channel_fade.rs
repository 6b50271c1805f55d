//! A single channel's in-flight fade: one [`crate::fade::FadeState`] per
//! sample, ticked once per call to [`ChannelBoundFade::process`] from the
//! owning node's process task.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tokio::sync::Notify;

use crate::channel::{set_values_raw, Channel, ChannelData};
use crate::fade::FadeState;
use crate::node::NodeShared;
use crate::universe::{Universe, UniverseData};

struct ChannelBoundFadeData {
    channel_data: Weak<RefCell<ChannelData>>,
    universe_data: Weak<RefCell<UniverseData>>,
    node: Weak<NodeShared>,
    fades: Vec<FadeState>,
    completion: Rc<Notify>,
    is_done: bool,
    /// Ticks processed so far, checked against the longest sample's step
    /// budget as a runaway-fade sanity net.
    ticks: u32,
}

/// A cheap `Rc` handle shared between a channel's `current_fade` slot and
/// the owning node's process-job list. Holds only weak references upward
/// to its channel/universe/node so it never keeps its own parents alive —
/// the node's ownership tree is what keeps everything alive while a fade
/// runs.
#[derive(Clone)]
pub struct ChannelBoundFade(Rc<RefCell<ChannelBoundFadeData>>);

impl ChannelBoundFade {
    pub(crate) fn new(
        channel_data: &Rc<RefCell<ChannelData>>,
        universe_data: &Rc<RefCell<UniverseData>>,
        node: &crate::node::Node,
        fades: Vec<FadeState>,
    ) -> Self {
        ChannelBoundFade(Rc::new(RefCell::new(ChannelBoundFadeData {
            channel_data: Rc::downgrade(channel_data),
            universe_data: Rc::downgrade(universe_data),
            node: node.weak(),
            fades,
            completion: Rc::new(Notify::new()),
            is_done: false,
            ticks: 0,
        })))
    }

    pub(crate) fn completion_notify(&self) -> Rc<Notify> {
        Rc::clone(&self.0.borrow().completion)
    }

    /// Identity check used by the node's process task to find and drop
    /// completed/cancelled jobs without relying on `PartialEq`.
    pub(crate) fn same_job(&self, other: &ChannelBoundFade) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.0.borrow().is_done
    }

    /// Step every sample's fade one tick and write the result into the
    /// owning channel/universe. Returns `true` once every sample has
    /// reached its target.
    pub(crate) fn process(&self) -> bool {
        let values = {
            let mut data = self.0.borrow_mut();
            let values: Vec<f64> = data.fades.iter_mut().map(FadeState::calc_next_value).collect();
            data.is_done = data.fades.iter().all(FadeState::is_done);

            data.ticks += 1;
            let budget = data.fades.iter().map(FadeState::steps).max().unwrap_or(0);
            if !data.is_done && data.ticks > budget {
                tracing::warn!(ticks = data.ticks, budget, "fade exceeded its step budget, forcing completion");
                data.is_done = true;
            }

            values
        };

        let (channel_data, universe_data) = {
            let data = self.0.borrow();
            (data.channel_data.upgrade(), data.universe_data.upgrade())
        };
        if let (Some(channel_data), Some(universe_data)) = (channel_data, universe_data) {
            let _ = set_values_raw(&channel_data, &universe_data, &values);
        }

        self.is_done()
    }

    /// Cancel this fade: clears the channel's `current_fade` slot and wakes
    /// anything awaiting the channel, without firing the finished callback.
    pub(crate) fn cancel(&self) {
        if let Some(channel_data) = self.0.borrow().channel_data.upgrade() {
            let mut data = channel_data.borrow_mut();
            if let Some(current) = &data.current_fade {
                if self.same_job(current) {
                    data.current_fade = None;
                }
            }
        }
        self.0.borrow().completion.notify_waiters();
        if let Some(node) = self.0.borrow().node.upgrade() {
            crate::node::Node::from_shared(node).remove_process_job(self);
        }
    }

    /// Called by the process task once [`ChannelBoundFade::process`]
    /// reports completion: clears `current_fade`, wakes awaiters, and fires
    /// the channel's fade-finished callback if one is registered.
    pub(crate) fn fire_complete(&self) {
        let channel_data = match self.0.borrow().channel_data.upgrade() {
            Some(c) => c,
            None => return,
        };
        let universe_data = match self.0.borrow().universe_data.upgrade() {
            Some(u) => u,
            None => return,
        };
        let node = match self.0.borrow().node.upgrade() {
            Some(n) => n,
            None => return,
        };

        {
            let mut data = channel_data.borrow_mut();
            if let Some(current) = &data.current_fade {
                if self.same_job(current) {
                    data.current_fade = None;
                }
            }
        }
        self.0.borrow().completion.notify_waiters();

        let node = crate::node::Node::from_shared(node);
        let universe = Universe::from_parts(node, universe_data);
        let channel = Channel::from_parts(universe, Rc::clone(&channel_data));
        let callback = channel_data.borrow_mut().fade_finished_callback.take();
        if let Some(mut callback) = callback {
            callback(&channel);
            channel_data.borrow_mut().fade_finished_callback = Some(callback);
        }
    }
}
