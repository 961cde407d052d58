//! Per-trigger overlay lifecycle controller
//!
//! One controller owns one trigger element and drives the open/close
//! lifecycle of its overlay panel:
//!
//! - **FSM-driven state**: Closed/Opening/Open/Closing, with the pending
//!   open or close deadline carried alongside the state
//! - **Deadline pump**: the host calls [`OverlayController::update`]
//!   once per tick; pending transitions commit when their deadline has
//!   passed, and deferred work (tap-away arming, forced closes) runs on
//!   the next tick
//! - **Interaction gates**: closeability gate, window-blur focus
//!   restoration, mouse-vs-keyboard activation tracking, touch tap-away
//!   arming
//!
//! All host side effects (panel calls, attribute writes, listener
//! binding) run with the controller lock released, because attribute
//! writes re-enter the controller through the structural observer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use smallvec::SmallVec;

use veil_core::{
    event_names, BindingId, BroadcastRegistry, BroadcastRegistryExt, Event, EventCallback,
    GlobalHandler, HostElement, HostServices, MutationCallback, ObserverHandle, PanelAnimation,
    PanelConfig, PanelContent, PanelHandle, Result, VeilError,
};

use crate::config::{OverlayConfig, OverlayKind};
use crate::interpolate::{interpolate, TriggerContext};
use crate::position::{Placement, PositionResolver};

/// Panel ids are unique across every controller in the process
static NEXT_PANEL_ID: AtomicU64 = AtomicU64::new(1);

// =============================================================================
// OverlayState - FSM for the overlay lifecycle
// =============================================================================

/// State machine for the overlay lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum OverlayState {
    /// Overlay is not visible and nothing is pending
    #[default]
    Closed,
    /// An open is scheduled; the overlay is not visible yet
    Opening,
    /// Overlay is visible
    Open,
    /// A close is scheduled; the overlay is still visible
    Closing,
}

/// Events driving [`OverlayState`] transitions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// An open trigger fired (Closed -> Opening)
    OpenRequested,
    /// A close trigger passed the gate (Open -> Closing)
    CloseRequested,
    /// A pending deadline elapsed (Opening -> Open, Closing -> Closed)
    Committed,
    /// A pending open was invalidated before its deadline
    Cancelled,
}

impl OverlayState {
    /// Whether the overlay is currently rendered
    pub fn is_visible(&self) -> bool {
        matches!(self, Self::Open | Self::Closing)
    }

    /// Whether the overlay is fully open
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }

    /// Whether a transition deadline is pending
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Opening | Self::Closing)
    }

    /// The transition table; `None` means the event is a designed no-op
    pub fn on_event(&self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent::*;
        use OverlayState::*;

        match (self, event) {
            // Closed -> Opening: schedule the open
            (Closed, OpenRequested) => Some(Opening),

            // Opening -> Open: the open deadline elapsed
            (Opening, Committed) => Some(Open),

            // Opening -> Closed: a close condition beat the deadline
            (Opening, Cancelled) | (Opening, CloseRequested) => Some(Closed),

            // Open -> Closing: schedule the close
            (Open, CloseRequested) => Some(Closing),

            // Closing -> Closed: the close deadline elapsed
            (Closing, Committed) => Some(Closed),

            _ => None,
        }
    }
}

/// The single pending transition a controller may carry
///
/// Present exactly while the state is Opening or Closing.
#[derive(Clone, Copy, Debug)]
struct PendingTransition {
    /// The visibility the transition commits to
    target_visible: bool,
    /// Absolute deadline in host time
    deadline_ms: u64,
}

/// Callback invoked when the committed visibility changes
pub type VisibilityCallback = Arc<dyn Fn(bool) + Send + Sync>;

/// Callback invoked when the placement changes
pub type PlacementCallback = Arc<dyn Fn(Placement) + Send + Sync>;

// =============================================================================
// ControllerInner
// =============================================================================

struct ControllerInner {
    host: HostServices,
    registry: BroadcastRegistry,
    trigger: Arc<dyn HostElement>,
    content: Arc<dyn HostElement>,
    config: OverlayConfig,
    context: TriggerContext,
    resolver: PositionResolver,

    state: OverlayState,
    pending: Option<PendingTransition>,
    now_ms: u64,
    panel: Option<Arc<dyn PanelHandle>>,

    // Interaction flags
    mouse_active: bool,
    focused_before_window_blur: bool,
    awaiting_touch_end: bool,
    arm_tap_away: bool,
    deferred_close: bool,

    // Bindings and subscriptions held for teardown
    close_triggers_bound: bool,
    open_bindings: SmallVec<[BindingId; 4]>,
    close_bindings: SmallVec<[BindingId; 4]>,
    scroll_handler: Option<GlobalHandler>,
    blur_handler: Option<GlobalHandler>,
    observer: Option<ObserverHandle>,
    always_watch: bool,

    visibility_watchers: Vec<VisibilityCallback>,
    placement_watchers: Vec<PlacementCallback>,
    destroyed: bool,
}

/// What an external visibility write resolved to
enum ExternalWrite {
    Nothing,
    CommitOpen,
    CommitClose,
    CancelOpen,
}

/// How a panel is obtained at open commit time
enum PanelPlan {
    Reuse(Arc<dyn PanelHandle>),
    Create(PanelConfig),
}

// =============================================================================
// OverlayController
// =============================================================================

/// Per-trigger overlay lifecycle controller
///
/// Cloning shares the controller; handles stay valid until
/// [`OverlayController::destroy`] runs.
#[derive(Clone)]
pub struct OverlayController {
    inner: Arc<Mutex<ControllerInner>>,
}

fn upgrade(weak: &Weak<Mutex<ControllerInner>>) -> Option<OverlayController> {
    weak.upgrade().map(|inner| OverlayController { inner })
}

impl OverlayController {
    /// Construct a controller and perform the initial binding pass
    ///
    /// Called by the factory; binds open triggers and the activation
    /// listeners, registers the shared window subscriptions, sets up
    /// structural observation, and resolves the initial position.
    pub(crate) fn create(
        host: HostServices,
        registry: BroadcastRegistry,
        trigger: Arc<dyn HostElement>,
        content: Arc<dyn HostElement>,
        config: OverlayConfig,
        context: TriggerContext,
    ) -> Self {
        let resolver = PositionResolver::new(config.placement);
        let inner = ControllerInner {
            host,
            registry,
            trigger,
            content,
            config,
            context,
            resolver,
            state: OverlayState::Closed,
            pending: None,
            now_ms: 0,
            panel: None,
            mouse_active: false,
            focused_before_window_blur: false,
            awaiting_touch_end: false,
            arm_tap_away: false,
            deferred_close: false,
            close_triggers_bound: false,
            open_bindings: SmallVec::new(),
            close_bindings: SmallVec::new(),
            scroll_handler: None,
            blur_handler: None,
            observer: None,
            always_watch: false,
            visibility_watchers: Vec::new(),
            placement_watchers: Vec::new(),
            destroyed: false,
        };

        let controller = Self {
            inner: Arc::new(Mutex::new(inner)),
        };
        controller.bind_trigger_events();
        controller.register_global_handlers();
        controller.setup_observation();

        // Initial position resolution pass.
        controller.inner.lock().unwrap().resolver.resolve();

        controller
    }

    // =========================================================================
    // Public surface
    // =========================================================================

    /// Advance host time and run due work
    ///
    /// Commits pending transitions whose deadline has passed and runs
    /// deferred actions queued for "the next tick". The host calls this
    /// once per tick/frame with its monotonic time.
    pub fn update(&self, now_ms: u64) -> Result<()> {
        let (arm, force, due) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.destroyed {
                return Ok(());
            }
            inner.now_ms = now_ms;

            let arm = std::mem::take(&mut inner.arm_tap_away);
            let mut force = std::mem::take(&mut inner.deferred_close);
            if inner.always_watch
                && inner.state != OverlayState::Closed
                && inner.trigger.is_disabled()
            {
                force = true;
            }

            let mut due = None;
            if let Some(p) = inner.pending {
                if !force && now_ms >= p.deadline_ms {
                    inner.pending = None;
                    due = Some(p.target_visible);
                }
            }
            (arm, force, due)
        };

        if arm {
            self.arm_tap_away_listener();
        }
        if force {
            tracing::debug!("overlay: force close (trigger disabled)");
            self.force_close();
            return Ok(());
        }
        match due {
            Some(true) => self.commit_open(),
            Some(false) => {
                self.commit_close();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// External visibility write
    ///
    /// Short-circuits any pending transition and commits directly,
    /// keeping the observable `visible` flag the single source of
    /// truth. Writing the value the overlay already holds is a no-op.
    pub fn set_visible(&self, visible: bool) -> Result<()> {
        let action = {
            let mut inner = self.inner.lock().unwrap();
            if inner.destroyed {
                return Ok(());
            }
            match (visible, inner.state) {
                (true, OverlayState::Closed) => ExternalWrite::CommitOpen,
                (true, OverlayState::Opening) => {
                    inner.pending = None;
                    inner.state = OverlayState::Closed;
                    ExternalWrite::CommitOpen
                }
                // Already visible; an external `true` while closing
                // just cancels the scheduled close.
                (true, OverlayState::Open) => ExternalWrite::Nothing,
                (true, OverlayState::Closing) => {
                    inner.pending = None;
                    inner.state = OverlayState::Open;
                    ExternalWrite::Nothing
                }
                (false, OverlayState::Opening) => {
                    inner.pending = None;
                    inner.state = OverlayState::Closed;
                    ExternalWrite::CancelOpen
                }
                (false, OverlayState::Open | OverlayState::Closing) => ExternalWrite::CommitClose,
                (false, OverlayState::Closed) => ExternalWrite::Nothing,
            }
        };

        match action {
            ExternalWrite::CommitOpen => {
                self.bind_close_triggers();
                self.commit_open()
            }
            ExternalWrite::CommitClose => {
                self.commit_close();
                Ok(())
            }
            ExternalWrite::CancelOpen => {
                self.unbind_close_triggers();
                Ok(())
            }
            ExternalWrite::Nothing => Ok(()),
        }
    }

    /// The externally observable visibility
    pub fn visible(&self) -> bool {
        self.inner.lock().unwrap().state.is_visible()
    }

    /// The current lifecycle state
    pub fn state(&self) -> OverlayState {
        self.inner.lock().unwrap().state
    }

    /// The current placement
    pub fn placement(&self) -> Placement {
        self.inner.lock().unwrap().resolver.placement()
    }

    /// The configuration the controller runs with
    pub fn config(&self) -> OverlayConfig {
        self.inner.lock().unwrap().config.clone()
    }

    /// Whether [`OverlayController::destroy`] has run
    pub fn is_destroyed(&self) -> bool {
        self.inner.lock().unwrap().destroyed
    }

    /// Change the placement and live-reposition an open panel
    pub fn set_placement(&self, placement: Placement) {
        let watchers = {
            let mut guard = self.inner.lock().unwrap();
            if guard.destroyed {
                return;
            }
            let inner = &mut *guard;
            inner.resolver.set_placement(placement);
            if let Some(panel) = &inner.panel {
                // Swap the class token and push the new anchor without
                // closing the panel.
                inner.resolver.apply(panel.as_ref());
            } else {
                inner.resolver.resolve();
            }
            inner.placement_watchers.clone()
        };
        for callback in watchers {
            callback(placement);
        }
    }

    /// Observe committed visibility changes
    ///
    /// The host composition layer reflects these into its own binding
    /// system.
    pub fn on_visibility_change(&self, callback: VisibilityCallback) {
        self.inner.lock().unwrap().visibility_watchers.push(callback);
    }

    /// Observe placement changes
    pub fn on_position_change(&self, callback: PlacementCallback) {
        self.inner.lock().unwrap().placement_watchers.push(callback);
    }

    /// Tear the controller down
    ///
    /// Forces visibility to false (bypassing any delay) and detaches
    /// the panel before releasing listeners, observers, and the shared
    /// registry subscriptions.
    pub fn destroy(&self) {
        if self.inner.lock().unwrap().destroyed {
            return;
        }

        // Close while the listeners are still alive.
        self.force_close();

        let (trigger, content, panel, bindings, registry, scroll, blur, observation, observer) = {
            let mut inner = self.inner.lock().unwrap();
            inner.destroyed = true;
            inner.close_triggers_bound = false;
            inner.visibility_watchers.clear();
            inner.placement_watchers.clear();

            let mut bindings = std::mem::take(&mut inner.open_bindings);
            bindings.extend(std::mem::take(&mut inner.close_bindings));
            (
                Arc::clone(&inner.trigger),
                Arc::clone(&inner.content),
                inner.panel.take(),
                bindings,
                Arc::clone(&inner.registry),
                inner.scroll_handler.take(),
                inner.blur_handler.take(),
                Arc::clone(&inner.host.observation),
                inner.observer.take(),
            )
        };

        for binding in bindings {
            trigger.off(binding);
        }
        if let Some(panel) = panel {
            panel.destroy();
        }
        content.detach();
        if let Some(handler) = scroll {
            registry.deregister(event_names::SCROLL, true, &handler);
        }
        if let Some(handler) = blur {
            registry.deregister(event_names::BLUR, false, &handler);
        }
        if let Some(observer) = observer {
            observation.disconnect(observer);
        }
        tracing::debug!("overlay: destroyed");
    }

    // =========================================================================
    // Construction passes
    // =========================================================================

    fn bind_trigger_events(&self) {
        let weak = Arc::downgrade(&self.inner);
        let (trigger, open_triggers) = {
            let inner = self.inner.lock().unwrap();
            (Arc::clone(&inner.trigger), inner.config.open_triggers.clone())
        };

        let mut bindings: SmallVec<[BindingId; 4]> = SmallVec::new();
        for name in &open_triggers {
            let weak = weak.clone();
            let callback: EventCallback = Arc::new(move |event: &Event| {
                if let Some(controller) = upgrade(&weak) {
                    controller.handle_open_trigger(event);
                }
            });
            bindings.push(trigger.on(name, callback));
        }

        // Mousedown rather than click marks mouse activation, so
        // synthetic clicks from keyboard activation don't count.
        let weak_mouse = weak.clone();
        let mousedown: EventCallback = Arc::new(move |_event: &Event| {
            if let Some(controller) = upgrade(&weak_mouse) {
                controller.inner.lock().unwrap().mouse_active = true;
            }
        });
        bindings.push(trigger.on(event_names::MOUSE_DOWN, mousedown));

        // The touchend that matches a touchstart open arms the
        // tap-away close on the next tick.
        let weak_touch = weak.clone();
        let touchend: EventCallback = Arc::new(move |_event: &Event| {
            if let Some(controller) = upgrade(&weak_touch) {
                let mut inner = controller.inner.lock().unwrap();
                if inner.awaiting_touch_end {
                    inner.awaiting_touch_end = false;
                    inner.arm_tap_away = true;
                }
            }
        });
        bindings.push(trigger.on(event_names::TOUCH_END, touchend));

        self.inner.lock().unwrap().open_bindings = bindings;
    }

    fn register_global_handlers(&self) {
        let weak = Arc::downgrade(&self.inner);
        let registry = self.inner.lock().unwrap().registry.clone();

        // Scroll hides the overlay; capture mode so it fires for
        // scrolls inside nested containers as well.
        let weak_scroll = weak.clone();
        let scroll: GlobalHandler = Arc::new(move |_event: &Event| {
            if let Some(controller) = upgrade(&weak_scroll) {
                controller.request_close(false);
            }
        });
        registry.register(event_names::SCROLL, true, Arc::clone(&scroll));

        // Window blur records whether the trigger held focus, so the
        // focus event the window fires on return is not taken as an
        // open intent.
        let weak_blur = weak.clone();
        let blur: GlobalHandler = Arc::new(move |_event: &Event| {
            if let Some(controller) = upgrade(&weak_blur) {
                let mut inner = controller.inner.lock().unwrap();
                if !inner.destroyed {
                    inner.focused_before_window_blur = inner.trigger.has_focus();
                }
            }
        });
        registry.register(event_names::BLUR, false, Arc::clone(&blur));

        let mut inner = self.inner.lock().unwrap();
        inner.scroll_handler = Some(scroll);
        inner.blur_handler = Some(blur);
    }

    fn setup_observation(&self) {
        let weak = Arc::downgrade(&self.inner);
        let (observation, trigger) = {
            let inner = self.inner.lock().unwrap();
            (Arc::clone(&inner.host.observation), Arc::clone(&inner.trigger))
        };

        let callback: MutationCallback = Arc::new(move |mutations| {
            let Some(controller) = upgrade(&weak) else {
                return;
            };
            if mutations.iter().any(|m| m.attribute == "disabled") {
                controller.note_disabled_mutation();
            }
        });

        match observation.observe_attributes(&trigger, callback) {
            Some(handle) => {
                self.inner.lock().unwrap().observer = Some(handle);
            }
            None => {
                // Capability unavailable: recover locally with the
                // always-watch fallback, never surface it.
                tracing::debug!("structural observation unavailable; using always-watch");
                self.inner.lock().unwrap().always_watch = true;
            }
        }
    }

    // =========================================================================
    // Event handlers
    // =========================================================================

    fn handle_open_trigger(&self, event: &Event) {
        let bind_close = {
            let mut inner = self.inner.lock().unwrap();
            if inner.destroyed || !inner.config.enabled {
                return;
            }
            if event.is(event_names::FOCUS) && inner.focused_before_window_blur {
                // Focus restoration after a window blur, not an open
                // intent.
                inner.focused_before_window_blur = false;
                return;
            }
            if inner.state != OverlayState::Closed {
                // Already visible, or a transition is pending.
                return;
            }
            let Some(next) = inner.state.on_event(LifecycleEvent::OpenRequested) else {
                return;
            };
            inner.state = next;
            let deadline_ms = inner.now_ms.saturating_add(inner.config.open_delay_ms);
            inner.pending = Some(PendingTransition {
                target_visible: true,
                deadline_ms,
            });
            if event.is(event_names::TOUCH_START) {
                inner.awaiting_touch_end = true;
            }
            tracing::debug!(
                event = event.event_type(),
                delay_ms = inner.config.open_delay_ms,
                "overlay: open scheduled"
            );
            !inner.close_triggers_bound
        };
        if bind_close {
            self.bind_close_triggers();
        }
    }

    fn handle_close_trigger(&self, _event: &Event) {
        self.request_close(true);
    }

    /// Run the close path; `gated` applies the closeability gate
    fn request_close(&self, gated: bool) {
        let cancelled = {
            let mut inner = self.inner.lock().unwrap();
            if inner.destroyed {
                return;
            }
            // Close is allowed when auto-hide is configured, when the
            // mouse was the activation method, or when focus has moved
            // off the trigger.
            let allowed = !gated
                || inner.config.auto_hide
                || inner.mouse_active
                || !inner.trigger.has_focus();

            let mut cancelled = false;
            if allowed {
                match inner.state {
                    OverlayState::Opening => {
                        // The close condition beat the open deadline:
                        // clear the pending open in this same turn.
                        if let Some(next) = inner.state.on_event(LifecycleEvent::Cancelled) {
                            inner.state = next;
                        }
                        inner.pending = None;
                        cancelled = true;
                        tracing::debug!("overlay: pending open cancelled");
                    }
                    OverlayState::Open => {
                        if let Some(next) = inner.state.on_event(LifecycleEvent::CloseRequested) {
                            inner.state = next;
                            let deadline_ms =
                                inner.now_ms.saturating_add(inner.config.close_delay_ms);
                            inner.pending = Some(PendingTransition {
                                target_visible: false,
                                deadline_ms,
                            });
                            tracing::debug!(
                                delay_ms = inner.config.close_delay_ms,
                                "overlay: close scheduled"
                            );
                        }
                    }
                    // Already pending close, or nothing to close.
                    OverlayState::Closing | OverlayState::Closed => {}
                }
            }
            if gated {
                inner.mouse_active = false;
            }
            cancelled
        };
        if cancelled {
            self.unbind_close_triggers();
        }
    }

    fn note_disabled_mutation(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed {
            return;
        }
        // Never close synchronously inside the observer callback; queue
        // for the next tick.
        if inner.state != OverlayState::Closed && inner.trigger.is_disabled() {
            inner.deferred_close = true;
        }
    }

    // =========================================================================
    // Commits
    // =========================================================================

    fn commit_open(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.destroyed || inner.state.is_visible() {
            return Ok(());
        }

        let kind = inner.config.kind;
        let text = inner.content.text_content().trim().to_owned();
        let existing_label = inner.trigger.attribute("aria-label");

        let refusal = match kind {
            OverlayKind::Tooltip if text.is_empty() => Some(VeilError::EmptyTooltip),
            OverlayKind::Popover
                if existing_label.is_none() && inner.config.label_override.is_none() =>
            {
                Some(VeilError::MissingAriaLabel)
            }
            _ => None,
        };
        if let Some(error) = refusal {
            inner.state = OverlayState::Closed;
            inner.pending = None;
            inner.close_triggers_bound = false;
            let bindings = std::mem::take(&mut inner.close_bindings);
            let trigger = Arc::clone(&inner.trigger);
            drop(inner);
            for binding in bindings {
                trigger.off(binding);
            }
            tracing::warn!(error = %error, "overlay: open refused");
            return Err(error);
        }

        // A tooltip labels its trigger with its own text when nothing
        // else does; a popover writes only an explicit override.
        let label_write = match kind {
            OverlayKind::Tooltip => {
                let raw = inner
                    .config
                    .label_override
                    .clone()
                    .unwrap_or_else(|| text.clone());
                (inner.config.label_override.is_some() || existing_label.is_none())
                    .then(|| interpolate(&raw, &inner.context))
            }
            OverlayKind::Popover => inner
                .config
                .label_override
                .clone()
                .map(|raw| interpolate(&raw, &inner.context)),
        };

        let plan = if let Some(panel) = inner.panel.as_ref() {
            PanelPlan::Reuse(Arc::clone(panel))
        } else {
            {
                let guard = &mut *inner;
                let (token, anchor) = guard.resolver.resolve();
                let id = format!(
                    "{}-{}",
                    kind.id_prefix(),
                    NEXT_PANEL_ID.fetch_add(1, Ordering::Relaxed)
                );
                let mut class_list = vec![kind.base_class().to_owned()];
                if !guard.config.popover_class.is_empty() {
                    class_list.push(guard.config.popover_class.clone());
                }
                class_list.push(token.to_owned());
                let animation = guard.config.animated.then(|| PanelAnimation {
                    open: "show".to_owned(),
                    close: "hide".to_owned(),
                });
                let content = match kind {
                    OverlayKind::Tooltip => PanelContent::Text(text.clone()),
                    OverlayKind::Popover => PanelContent::Element(Arc::clone(&guard.content)),
                };
                PanelPlan::Create(PanelConfig {
                    id,
                    class_list,
                    z_index: guard.config.z_index,
                    position: anchor,
                    animation,
                    attach_to_root: true,
                    propagate_container_events: true,
                    focus_on_open: false,
                    content,
                })
            }
        };

        inner.state = OverlayState::Open;
        inner.pending = None;
        let trigger = Arc::clone(&inner.trigger);
        let panels = Arc::clone(&inner.host.panels);
        let watchers = inner.visibility_watchers.clone();
        drop(inner);

        // Attribute writes notify the structural observer, so they run
        // with the lock released.
        if let Some(label) = label_write {
            trigger.set_attribute("aria-label", &label);
        }

        let panel = match plan {
            PanelPlan::Reuse(panel) => panel,
            PanelPlan::Create(config) => {
                let panel = panels.create_panel(config);
                self.inner.lock().unwrap().panel = Some(Arc::clone(&panel));
                panel
            }
        };

        // The role lands once render and animate-in complete.
        let rendered = Arc::clone(&panel);
        let role = kind.role();
        panel.open(Box::new(move || {
            rendered.set_attribute("role", role);
        }));

        for callback in watchers {
            callback(true);
        }
        tracing::debug!(kind = ?kind, "overlay: opened");
        Ok(())
    }

    fn commit_close(&self) {
        let (panel, trigger, bindings, watchers) = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.state.is_visible() {
                return;
            }
            inner.state = OverlayState::Closed;
            inner.pending = None;
            inner.close_triggers_bound = false;
            (
                inner.panel.clone(),
                Arc::clone(&inner.trigger),
                std::mem::take(&mut inner.close_bindings),
                inner.visibility_watchers.clone(),
            )
        };

        // No-op when no panel has ever been created.
        if let Some(panel) = panel {
            panel.hide();
        }
        for binding in bindings {
            trigger.off(binding);
        }
        for callback in watchers {
            callback(false);
        }
        tracing::debug!("overlay: closed");
    }

    /// Close immediately, bypassing any delay
    fn force_close(&self) {
        let cancelled = {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                OverlayState::Opening => {
                    inner.state = OverlayState::Closed;
                    inner.pending = None;
                    true
                }
                _ => false,
            }
        };
        if cancelled {
            self.unbind_close_triggers();
        } else {
            self.commit_close();
        }
    }

    // =========================================================================
    // Close trigger binding
    // =========================================================================

    /// Bind the close triggers; bound lazily while an open is scheduled
    /// or committed
    fn bind_close_triggers(&self) {
        let weak = Arc::downgrade(&self.inner);
        let (trigger, names) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.close_triggers_bound {
                return;
            }
            inner.close_triggers_bound = true;
            (Arc::clone(&inner.trigger), inner.config.close_triggers.clone())
        };

        let mut bindings: SmallVec<[BindingId; 4]> = SmallVec::new();
        for name in &names {
            let weak = weak.clone();
            let callback: EventCallback = Arc::new(move |event: &Event| {
                if let Some(controller) = upgrade(&weak) {
                    controller.handle_close_trigger(event);
                }
            });
            bindings.push(trigger.on(name, callback));
        }
        self.inner.lock().unwrap().close_bindings = bindings;
    }

    fn unbind_close_triggers(&self) {
        let (trigger, bindings) = {
            let mut inner = self.inner.lock().unwrap();
            inner.close_triggers_bound = false;
            (
                Arc::clone(&inner.trigger),
                std::mem::take(&mut inner.close_bindings),
            )
        };
        for binding in bindings {
            trigger.off(binding);
        }
    }

    /// Bind the one-shot document tap-away listener
    ///
    /// Deferred to the tick after the opening gesture's touchend, so
    /// the gesture that opened the overlay cannot also close it.
    fn arm_tap_away_listener(&self) {
        let weak = Arc::downgrade(&self.inner);
        let document = Arc::clone(&self.inner.lock().unwrap().host.document);
        document.once(
            event_names::TOUCH_END,
            Arc::new(move |event: &Event| {
                if let Some(controller) = upgrade(&weak) {
                    controller.handle_close_trigger(event);
                }
            }),
        );
        tracing::debug!("overlay: tap-away close armed");
    }
}

impl std::fmt::Debug for OverlayController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("OverlayController")
            .field("state", &inner.state)
            .field("placement", &inner.resolver.placement())
            .field("destroyed", &inner.destroyed)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use veil_core::memory::{MemoryElement, MemoryHost};

    use super::*;
    use crate::config::DeclaredOptions;
    use crate::factory::OverlayFactory;

    fn popover_setup(
        options: DeclaredOptions,
    ) -> (MemoryHost, Arc<MemoryElement>, Arc<MemoryElement>, OverlayController) {
        let host = MemoryHost::new();
        let factory = OverlayFactory::new(host.services());
        let trigger = host.create_element();
        trigger.set_attribute("aria-label", "Open billing");
        let content = host.create_element();
        content.set_text("billing details");
        let controller = factory
            .create_popover(
                TriggerContext::new(),
                trigger.clone(),
                content.clone(),
                options,
            )
            .unwrap();
        (host, trigger, content, controller)
    }

    fn tooltip_setup(
        text: &str,
    ) -> (MemoryHost, Arc<MemoryElement>, Arc<MemoryElement>, OverlayController) {
        let host = MemoryHost::new();
        let factory = OverlayFactory::new(host.services());
        let trigger = host.create_element();
        let content = host.create_element();
        content.set_text(text);
        let controller = factory
            .create_tooltip(
                TriggerContext::new(),
                trigger.clone(),
                content.clone(),
                DeclaredOptions::new(),
            )
            .unwrap();
        (host, trigger, content, controller)
    }

    #[test]
    fn test_state_transitions() {
        use LifecycleEvent::*;

        let mut state = OverlayState::Closed;

        // Closed -> Opening
        state = state.on_event(OpenRequested).unwrap();
        assert_eq!(state, OverlayState::Opening);

        // Opening -> Open
        state = state.on_event(Committed).unwrap();
        assert_eq!(state, OverlayState::Open);

        // Open -> Closing
        state = state.on_event(CloseRequested).unwrap();
        assert_eq!(state, OverlayState::Closing);

        // Closing -> Closed
        state = state.on_event(Committed).unwrap();
        assert_eq!(state, OverlayState::Closed);

        // A close request cancels a pending open.
        let opening = OverlayState::Opening;
        assert_eq!(opening.on_event(CloseRequested), Some(OverlayState::Closed));
        assert_eq!(opening.on_event(Cancelled), Some(OverlayState::Closed));

        // Redundant requests are designed no-ops.
        assert_eq!(OverlayState::Open.on_event(OpenRequested), None);
        assert_eq!(OverlayState::Closed.on_event(CloseRequested), None);
    }

    #[test]
    fn test_open_commits_after_delay() {
        let mut options = DeclaredOptions::new();
        options.open_delay_ms = Some(50);
        let (host, trigger, _content, controller) = popover_setup(options);

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        assert_eq!(controller.state(), OverlayState::Opening);
        assert!(!controller.visible());

        controller.update(49).unwrap();
        assert!(!controller.visible());
        assert!(host.panels().is_empty());

        controller.update(50).unwrap();
        assert!(controller.visible());
        assert_eq!(controller.state(), OverlayState::Open);

        let panel = host.last_panel().unwrap();
        assert_eq!(panel.open_count(), 1);
        assert!(panel.config().id.starts_with("popover-"));
        assert!(panel.classes().contains(&"veil-popover".to_owned()));
        assert!(panel.classes().contains(&"position-top".to_owned()));
        assert_eq!(panel.attribute("role"), Some("popover".to_owned()));
    }

    #[test]
    fn test_close_before_open_deadline_cancels() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        // Open and close trigger in the same turn, before the pump runs.
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 1);
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));

        controller.update(0).unwrap();
        assert!(!controller.visible());
        // The panel was never created, let alone opened or hidden.
        assert!(host.panels().is_empty());
        // The lazily bound close triggers were released by the cancel.
        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 0);
    }

    #[test]
    fn test_panel_invoked_once_per_committed_transition() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(2).unwrap();

        let panel = host.last_panel().unwrap();
        assert!(!controller.visible());
        assert_eq!(panel.open_count(), 1);
        assert_eq!(panel.hide_count(), 1);

        // A second cycle reuses the same panel instance.
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(3).unwrap();
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(4).unwrap();

        assert_eq!(host.panels().len(), 1);
        assert_eq!(panel.open_count(), 2);
        assert_eq!(panel.hide_count(), 2);
    }

    #[test]
    fn test_redundant_open_requests_are_suppressed() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();

        // Re-triggering while open is also a no-op.
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(2).unwrap();

        assert!(controller.visible());
        assert_eq!(host.last_panel().unwrap().open_count(), 1);
    }

    #[test]
    fn test_keyboard_focus_gates_close() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        host.focus(&trigger);
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(1).unwrap();
        assert!(controller.visible());

        // Focus legitimately remains on the trigger: blur-style close
        // triggers must not close the overlay.
        trigger.dispatch(&Event::new(event_names::BLUR));
        controller.update(2).unwrap();
        assert!(controller.visible());

        // Once focus moves away the same trigger event closes it.
        host.clear_focus();
        trigger.dispatch(&Event::new(event_names::BLUR));
        controller.update(3).unwrap();
        assert!(!controller.visible());
        assert_eq!(host.last_panel().unwrap().hide_count(), 1);
    }

    #[test]
    fn test_auto_hide_overrides_focus_gate() {
        let mut options = DeclaredOptions::new();
        options.auto_hide = Some(true);
        let (host, trigger, _content, controller) = popover_setup(options);

        host.focus(&trigger);
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(1).unwrap();
        assert!(controller.visible());

        trigger.dispatch(&Event::new(event_names::BLUR));
        controller.update(2).unwrap();
        assert!(!controller.visible());
    }

    #[test]
    fn test_mouse_activation_overrides_focus_gate_once() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        host.focus(&trigger);
        trigger.dispatch(&Event::new(event_names::MOUSE_DOWN));
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        assert!(controller.visible());

        // Mouse activation lets the close through despite focus.
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(2).unwrap();
        assert!(!controller.visible());

        // The flag resets after the gate evaluation: the next cycle is
        // keyboard-gated again.
        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(3).unwrap();
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(4).unwrap();
        assert!(controller.visible());
    }

    #[test]
    fn test_window_blur_suppresses_focus_restoration() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        // The window blurs while the trigger holds focus.
        host.focus(&trigger);
        host.emit_window(event_names::BLUR);

        // The focus the trigger receives when the window returns is a
        // restoration, not an open intent.
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(1).unwrap();
        assert!(!controller.visible());

        // The flag was cleared: a later real focus opens normally.
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(2).unwrap();
        assert!(controller.visible());
    }

    #[test]
    fn test_window_blur_without_trigger_focus_does_not_suppress() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        host.emit_window(event_names::BLUR);
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(1).unwrap();
        assert!(controller.visible());
    }

    #[test]
    fn test_scroll_closes_open_overlay() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        host.focus(&trigger);
        trigger.dispatch(&Event::new(event_names::FOCUS));
        controller.update(1).unwrap();
        assert!(controller.visible());

        // Scroll bypasses the closeability gate even while focused.
        host.emit_window(event_names::SCROLL);
        controller.update(2).unwrap();
        assert!(!controller.visible());
        assert_eq!(host.last_panel().unwrap().hide_count(), 1);
    }

    #[test]
    fn test_scroll_cancels_pending_open() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        host.emit_window(event_names::SCROLL);
        controller.update(1).unwrap();

        assert!(!controller.visible());
        assert!(host.panels().is_empty());
    }

    #[test]
    fn test_disabled_mutation_closes_on_next_tick() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        assert!(controller.visible());

        // The mutation callback never closes synchronously.
        trigger.set_disabled(true);
        assert!(controller.visible());

        controller.update(2).unwrap();
        assert!(!controller.visible());
        assert_eq!(host.last_panel().unwrap().hide_count(), 1);
    }

    #[test]
    fn test_disabled_polling_fallback_when_observation_unavailable() {
        let host = MemoryHost::new();
        host.set_observation_supported(false);
        let factory = OverlayFactory::new(host.services());
        let trigger = host.create_element();
        trigger.set_attribute("aria-label", "Open billing");
        let content = host.create_element();
        content.set_text("billing details");
        let controller = factory
            .create_popover(
                TriggerContext::new(),
                trigger.clone(),
                content,
                DeclaredOptions::new(),
            )
            .unwrap();

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        assert!(controller.visible());

        trigger.set_disabled(true);
        controller.update(2).unwrap();
        assert!(!controller.visible());
    }

    #[test]
    fn test_whitespace_tooltip_refuses_to_open() {
        let (host, trigger, _content, controller) = tooltip_setup("   \n  ");

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        assert!(matches!(controller.update(1), Err(VeilError::EmptyTooltip)));

        assert!(!controller.visible());
        assert!(host.panels().is_empty());
    }

    #[test]
    fn test_tooltip_hands_text_to_panel_and_labels_trigger() {
        let (host, trigger, _content, controller) = tooltip_setup("  Saved!  ");

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();

        let panel = host.last_panel().unwrap();
        assert_eq!(panel.text_content(), Some("Saved!".to_owned()));
        assert!(panel.config().id.starts_with("tooltip-"));
        assert_eq!(panel.attribute("role"), Some("tooltip".to_owned()));
        // The tooltip backfills the trigger's label from its own text.
        assert_eq!(trigger.attribute("aria-label"), Some("Saved!".to_owned()));
    }

    #[test]
    fn test_unlabeled_popover_refuses_without_override() {
        let host = MemoryHost::new();
        let factory = OverlayFactory::new(host.services());
        let trigger = host.create_element();
        let content = host.create_element();
        content.set_text("details");
        let controller = factory
            .create_popover(
                TriggerContext::new(),
                trigger.clone(),
                content,
                DeclaredOptions::new(),
            )
            .unwrap();

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        assert!(matches!(
            controller.update(1),
            Err(VeilError::MissingAriaLabel)
        ));
        assert!(!controller.visible());
    }

    #[test]
    fn test_override_label_interpolates_onto_trigger() {
        let host = MemoryHost::new();
        let factory = OverlayFactory::new(host.services());
        let trigger = host.create_element();
        let content = host.create_element();
        content.set_text("details");

        let mut options = DeclaredOptions::new();
        options.label = Some("View {{ doc.kind }}".to_owned());
        let context = TriggerContext::new().with("doc.kind", "invoice");

        let controller = factory
            .create_popover(context, trigger.clone(), content, options)
            .unwrap();

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();

        assert!(controller.visible());
        assert_eq!(trigger.attribute("aria-label"), Some("View invoice".to_owned()));
    }

    #[test]
    fn test_touch_tap_away_binding_is_deferred() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::TOUCH_START));
        // Nothing is armed until the gesture's touchend and a tick.
        assert_eq!(host.document_once_count(event_names::TOUCH_END), 0);

        trigger.dispatch(&Event::new(event_names::TOUCH_END));
        assert_eq!(host.document_once_count(event_names::TOUCH_END), 0);

        controller.update(1).unwrap();
        assert!(controller.visible());
        assert_eq!(host.document_once_count(event_names::TOUCH_END), 1);

        // The outside tap closes through the normal gated path.
        host.emit_document(event_names::TOUCH_END);
        controller.update(2).unwrap();
        assert!(!controller.visible());
    }

    #[test]
    fn test_enabled_false_makes_open_triggers_inert() {
        let mut options = DeclaredOptions::new();
        options.enabled = Some(false);
        let (host, trigger, _content, controller) = popover_setup(options);

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();

        assert!(!controller.visible());
        assert!(host.panels().is_empty());
    }

    #[test]
    fn test_external_visibility_write_commits_directly() {
        let (host, _trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        controller.set_visible(true).unwrap();
        assert!(controller.visible());
        assert_eq!(host.last_panel().unwrap().open_count(), 1);

        // Writing the current value is a designed no-op.
        controller.set_visible(true).unwrap();
        assert_eq!(host.last_panel().unwrap().open_count(), 1);

        controller.set_visible(false).unwrap();
        assert!(!controller.visible());
        assert_eq!(host.last_panel().unwrap().hide_count(), 1);
    }

    #[test]
    fn test_external_write_short_circuits_pending_open() {
        let mut options = DeclaredOptions::new();
        options.open_delay_ms = Some(50);
        let (host, trigger, _content, controller) = popover_setup(options);

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.set_visible(false).unwrap();

        // The deadline passing later must not resurrect the open.
        controller.update(100).unwrap();
        assert!(!controller.visible());
        assert!(host.panels().is_empty());
    }

    #[test]
    fn test_visibility_watchers_see_committed_changes() {
        let (_host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.on_visibility_change(Arc::new(move |visible| {
            sink.lock().unwrap().push(visible);
        }));

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(2).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![true, false]);
    }

    #[test]
    fn test_set_placement_repositions_open_panel() {
        let (host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        controller.on_position_change(Arc::new(move |placement| {
            sink.lock().unwrap().push(placement);
        }));

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();

        let panel = host.last_panel().unwrap();
        assert!(panel.classes().contains(&"position-top".to_owned()));

        controller.set_placement(Placement::Left);

        // The stale token is swapped and the open panel repositions
        // without closing.
        assert!(panel.is_open());
        assert!(panel.classes().contains(&"position-left".to_owned()));
        assert!(!panel.classes().contains(&"position-top".to_owned()));
        assert_eq!(panel.anchor(), Placement::Left.anchor());
        assert_eq!(*seen.lock().unwrap(), vec![Placement::Left]);
    }

    #[test]
    fn test_close_triggers_bind_lazily_and_release_on_close() {
        let (_host, trigger, _content, controller) = popover_setup(DeclaredOptions::new());

        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 0);

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 1);

        controller.update(1).unwrap();
        trigger.dispatch(&Event::new(event_names::MOUSE_LEAVE));
        controller.update(2).unwrap();

        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 0);
    }

    #[test]
    fn test_destroy_forces_close_and_releases_everything() {
        let (host, trigger, content, controller) = popover_setup(DeclaredOptions::new());

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.update(1).unwrap();
        assert!(controller.visible());

        controller.destroy();

        assert!(!controller.visible());
        assert!(controller.is_destroyed());
        let panel = host.last_panel().unwrap();
        assert_eq!(panel.hide_count(), 1);
        assert_eq!(panel.destroy_count(), 1);
        assert!(content.is_detached());

        // Registry subscriptions and element bindings are gone.
        assert_eq!(host.window_listener_count(event_names::SCROLL), 0);
        assert_eq!(host.window_listener_count(event_names::BLUR), 0);
        assert_eq!(trigger.listener_count(event_names::MOUSE_ENTER), 0);
        assert_eq!(trigger.listener_count(event_names::MOUSE_DOWN), 0);
        assert_eq!(trigger.listener_count(event_names::TOUCH_END), 0);
        assert_eq!(trigger.listener_count(event_names::MOUSE_LEAVE), 0);

        // Destroy is idempotent and the controller stays inert.
        controller.destroy();
        controller.update(5).unwrap();
        assert!(!controller.visible());
    }

    #[test]
    fn test_destroy_while_open_is_pending() {
        let mut options = DeclaredOptions::new();
        options.open_delay_ms = Some(50);
        let (host, trigger, _content, controller) = popover_setup(options);

        trigger.dispatch(&Event::new(event_names::MOUSE_ENTER));
        controller.destroy();

        assert!(!controller.visible());
        assert!(host.panels().is_empty());
    }
}
