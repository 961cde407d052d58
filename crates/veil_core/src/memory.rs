//! In-memory host implementation
//!
//! A complete [`crate::host`] implementation with no real UI behind it:
//! elements live in a slotmap, the panel renderer records every call it
//! receives, and "rendering" completes synchronously. Used headless and
//! by the test suites of both veil crates.
//!
//! Events are never synthesized: focus changes only flip the focused
//! element, and tests dispatch `focus`/`blur` events explicitly so the
//! ordering under test is exactly the ordering delivered.

use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use slotmap::{new_key_type, SlotMap};

use crate::events::Event;
use crate::host::{
    AnchorDescriptor, AttributeMutation, BindingId, DocumentHost, EventCallback, GlobalTarget,
    HostElement, HostServices, ListenerHandle, MutationCallback, ObserverHandle, PanelConfig,
    PanelContent, PanelHandle, PanelHost, StructuralObservation,
};

new_key_type! {
    /// Key for an element owned by the memory host
    pub struct ElementKey;
}

/// Per-element state
#[derive(Default)]
struct ElementData {
    attributes: FxHashMap<String, String>,
    text: String,
    listeners: Vec<(BindingId, String, EventCallback)>,
    detached: bool,
}

/// One listener attached to the window target
struct WindowListener {
    handle: ListenerHandle,
    event_type: String,
    dispatch: EventCallback,
}

/// One structural observer
struct ObserverRecord {
    handle: ObserverHandle,
    target: ElementKey,
    callback: MutationCallback,
}

/// Shared state behind every handle the memory host gives out
struct MemoryHostState {
    elements: SlotMap<ElementKey, ElementData>,
    /// Allocation address of each element handle, for observer lookup
    element_index: FxHashMap<usize, ElementKey>,
    focused: Option<ElementKey>,
    window_listeners: Vec<WindowListener>,
    document_once: Vec<(String, EventCallback)>,
    touch_capable: bool,
    observation_supported: bool,
    observers: Vec<ObserverRecord>,
    panels: Vec<Arc<MemoryPanel>>,
    next_id: u64,
}

impl MemoryHostState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

// =============================================================================
// MemoryHost
// =============================================================================

/// The in-memory host
///
/// Cloning shares the underlying state; [`MemoryHost::services`] hands
/// the same state out behind every capability trait.
#[derive(Clone)]
pub struct MemoryHost {
    state: Arc<Mutex<MemoryHostState>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    /// Create a host with observation supported and no touch capability
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryHostState {
                elements: SlotMap::with_key(),
                element_index: FxHashMap::default(),
                focused: None,
                window_listeners: Vec::new(),
                document_once: Vec::new(),
                touch_capable: false,
                observation_supported: true,
                observers: Vec::new(),
                panels: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Report touch capability from the document probe
    pub fn set_touch_capable(&self, touch: bool) {
        self.state.lock().unwrap().touch_capable = touch;
    }

    /// Make [`StructuralObservation::observe_attributes`] return `None`
    pub fn set_observation_supported(&self, supported: bool) {
        self.state.lock().unwrap().observation_supported = supported;
    }

    /// Create a fresh element
    pub fn create_element(&self) -> Arc<MemoryElement> {
        let mut state = self.state.lock().unwrap();
        let key = state.elements.insert(ElementData::default());
        let element = Arc::new(MemoryElement {
            key,
            state: Arc::clone(&self.state),
        });
        let ptr = Arc::as_ptr(&element) as usize;
        state.element_index.insert(ptr, key);
        element
    }

    /// Give keyboard focus to an element (flag only, no events)
    pub fn focus(&self, element: &MemoryElement) {
        self.state.lock().unwrap().focused = Some(element.key);
    }

    /// Clear keyboard focus
    pub fn clear_focus(&self) {
        self.state.lock().unwrap().focused = None;
    }

    /// Deliver an event to every window listener for its name
    pub fn emit_window(&self, event_type: &str) {
        let event = Event::new(event_type);
        let dispatches: Vec<EventCallback> = {
            let state = self.state.lock().unwrap();
            state
                .window_listeners
                .iter()
                .filter(|l| l.event_type == event_type)
                .map(|l| Arc::clone(&l.dispatch))
                .collect()
        };
        for dispatch in dispatches {
            dispatch(&event);
        }
    }

    /// Deliver an event to the matching one-shot document listeners
    pub fn emit_document(&self, event_type: &str) {
        let event = Event::new(event_type);
        let fired: Vec<EventCallback> = {
            let mut state = self.state.lock().unwrap();
            let (matching, rest): (Vec<_>, Vec<_>) = state
                .document_once
                .drain(..)
                .partition(|(name, _)| name == event_type);
            state.document_once = rest;
            matching.into_iter().map(|(_, cb)| cb).collect()
        };
        for callback in fired {
            callback(&event);
        }
    }

    /// Number of listeners attached to the window for an event name
    pub fn window_listener_count(&self, event_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .window_listeners
            .iter()
            .filter(|l| l.event_type == event_type)
            .count()
    }

    /// Number of pending one-shot document listeners for an event name
    pub fn document_once_count(&self, event_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .document_once
            .iter()
            .filter(|(name, _)| name == event_type)
            .count()
    }

    /// Panels created so far, in creation order
    pub fn panels(&self) -> Vec<Arc<MemoryPanel>> {
        self.state.lock().unwrap().panels.clone()
    }

    /// The most recently created panel
    pub fn last_panel(&self) -> Option<Arc<MemoryPanel>> {
        self.state.lock().unwrap().panels.last().cloned()
    }

    /// The window capability handle
    pub fn window(&self) -> Arc<dyn GlobalTarget> {
        Arc::new(self.clone())
    }

    /// The full capability bundle backed by this host
    pub fn services(&self) -> HostServices {
        HostServices {
            window: Arc::new(self.clone()),
            document: Arc::new(self.clone()),
            panels: Arc::new(self.clone()),
            observation: Arc::new(self.clone()),
        }
    }
}

impl GlobalTarget for MemoryHost {
    fn add_listener(
        &self,
        event_type: &str,
        _capture: bool,
        dispatch: EventCallback,
    ) -> ListenerHandle {
        let mut state = self.state.lock().unwrap();
        let handle = ListenerHandle(state.next_id());
        state.window_listeners.push(WindowListener {
            handle,
            event_type: event_type.to_owned(),
            dispatch,
        });
        handle
    }

    fn remove_listener(&self, handle: ListenerHandle) {
        self.state
            .lock()
            .unwrap()
            .window_listeners
            .retain(|l| l.handle != handle);
    }
}

impl DocumentHost for MemoryHost {
    fn once(&self, event_type: &str, callback: EventCallback) {
        self.state
            .lock()
            .unwrap()
            .document_once
            .push((event_type.to_owned(), callback));
    }

    fn is_touch_capable(&self) -> bool {
        self.state.lock().unwrap().touch_capable
    }
}

impl PanelHost for MemoryHost {
    fn create_panel(&self, config: PanelConfig) -> Arc<dyn PanelHandle> {
        let panel = Arc::new(MemoryPanel::new(config));
        self.state.lock().unwrap().panels.push(Arc::clone(&panel));
        panel
    }
}

impl StructuralObservation for MemoryHost {
    fn observe_attributes(
        &self,
        element: &Arc<dyn HostElement>,
        callback: MutationCallback,
    ) -> Option<ObserverHandle> {
        let mut state = self.state.lock().unwrap();
        if !state.observation_supported {
            return None;
        }
        // Identity is the element allocation; only elements created by
        // this host can be observed.
        let ptr = Arc::as_ptr(element) as *const () as usize;
        let target = *state.element_index.get(&ptr)?;
        let handle = ObserverHandle(state.next_id());
        state.observers.push(ObserverRecord {
            handle,
            target,
            callback,
        });
        Some(handle)
    }

    fn disconnect(&self, handle: ObserverHandle) {
        self.state
            .lock()
            .unwrap()
            .observers
            .retain(|o| o.handle != handle);
    }
}

// =============================================================================
// MemoryElement
// =============================================================================

/// An element owned by a [`MemoryHost`]
pub struct MemoryElement {
    key: ElementKey,
    state: Arc<Mutex<MemoryHostState>>,
}

impl MemoryElement {
    /// Set the element's literal text content
    pub fn set_text(&self, text: &str) {
        if let Some(data) = self.state.lock().unwrap().elements.get_mut(self.key) {
            data.text = text.to_owned();
        }
    }

    /// Add or remove the `disabled` attribute (notifies observers)
    pub fn set_disabled(&self, disabled: bool) {
        if disabled {
            self.set_attribute("disabled", "disabled");
        } else {
            self.remove_attribute("disabled");
        }
    }

    /// Whether [`HostElement::detach`] has been called
    pub fn is_detached(&self) -> bool {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(self.key)
            .map(|d| d.detached)
            .unwrap_or(false)
    }

    /// Number of listeners currently bound for an event name
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(self.key)
            .map(|d| {
                d.listeners
                    .iter()
                    .filter(|(_, name, _)| name == event_type)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Snapshot observers watching this element, then notify them
    fn notify_observers(&self, attribute: &str) {
        let callbacks: Vec<MutationCallback> = {
            let state = self.state.lock().unwrap();
            state
                .observers
                .iter()
                .filter(|o| o.target == self.key)
                .map(|o| Arc::clone(&o.callback))
                .collect()
        };
        let mutations = [AttributeMutation {
            attribute: attribute.to_owned(),
        }];
        for callback in callbacks {
            callback(&mutations);
        }
    }
}

impl HostElement for MemoryElement {
    fn on(&self, event_type: &str, callback: EventCallback) -> BindingId {
        let mut state = self.state.lock().unwrap();
        let binding = BindingId(state.next_id());
        if let Some(data) = state.elements.get_mut(self.key) {
            data.listeners
                .push((binding, event_type.to_owned(), callback));
        }
        binding
    }

    fn off(&self, binding: BindingId) {
        if let Some(data) = self.state.lock().unwrap().elements.get_mut(self.key) {
            data.listeners.retain(|(id, _, _)| *id != binding);
        }
    }

    fn dispatch(&self, event: &Event) {
        let callbacks: Vec<EventCallback> = {
            let state = self.state.lock().unwrap();
            state
                .elements
                .get(self.key)
                .map(|d| {
                    d.listeners
                        .iter()
                        .filter(|(_, name, _)| name == event.event_type())
                        .map(|(_, _, cb)| Arc::clone(cb))
                        .collect()
                })
                .unwrap_or_default()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(self.key)
            .and_then(|d| d.attributes.get(name).cloned())
    }

    fn set_attribute(&self, name: &str, value: &str) {
        if let Some(data) = self.state.lock().unwrap().elements.get_mut(self.key) {
            data.attributes.insert(name.to_owned(), value.to_owned());
        }
        self.notify_observers(name);
    }

    fn remove_attribute(&self, name: &str) {
        let existed = self
            .state
            .lock()
            .unwrap()
            .elements
            .get_mut(self.key)
            .map(|d| d.attributes.remove(name).is_some())
            .unwrap_or(false);
        if existed {
            self.notify_observers(name);
        }
    }

    fn is_disabled(&self) -> bool {
        self.attribute("disabled").is_some()
    }

    fn text_content(&self) -> String {
        self.state
            .lock()
            .unwrap()
            .elements
            .get(self.key)
            .map(|d| d.text.clone())
            .unwrap_or_default()
    }

    fn has_focus(&self) -> bool {
        self.state.lock().unwrap().focused == Some(self.key)
    }

    fn detach(&self) {
        if let Some(data) = self.state.lock().unwrap().elements.get_mut(self.key) {
            data.detached = true;
        }
    }
}

// =============================================================================
// MemoryPanel
// =============================================================================

/// Recorded panel state
struct MemoryPanelState {
    classes: Vec<String>,
    attributes: FxHashMap<String, String>,
    anchor: AnchorDescriptor,
    is_open: bool,
    open_count: usize,
    hide_count: usize,
    destroy_count: usize,
}

/// A recording panel: every collaborator call is counted
pub struct MemoryPanel {
    config: PanelConfig,
    state: Mutex<MemoryPanelState>,
}

impl MemoryPanel {
    fn new(config: PanelConfig) -> Self {
        let state = MemoryPanelState {
            classes: config.class_list.clone(),
            attributes: FxHashMap::default(),
            anchor: config.position,
            is_open: false,
            open_count: 0,
            hide_count: 0,
            destroy_count: 0,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    /// The configuration the panel was created with
    pub fn config(&self) -> &PanelConfig {
        &self.config
    }

    /// The text handed over, if the content was the tooltip variant
    pub fn text_content(&self) -> Option<String> {
        match &self.config.content {
            PanelContent::Text(text) => Some(text.clone()),
            PanelContent::Element(_) => None,
        }
    }

    /// Times [`PanelHandle::open`] was invoked
    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    /// Times [`PanelHandle::hide`] was invoked
    pub fn hide_count(&self) -> usize {
        self.state.lock().unwrap().hide_count
    }

    /// Times [`PanelHandle::destroy`] was invoked
    pub fn destroy_count(&self) -> usize {
        self.state.lock().unwrap().destroy_count
    }

    /// Whether the panel is currently rendered
    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().is_open
    }

    /// Current class tokens on the rendered element
    pub fn classes(&self) -> Vec<String> {
        self.state.lock().unwrap().classes.clone()
    }

    /// Read an attribute on the rendered element
    pub fn attribute(&self, name: &str) -> Option<String> {
        self.state.lock().unwrap().attributes.get(name).cloned()
    }

    /// The last anchor descriptor pushed to the panel
    pub fn anchor(&self) -> AnchorDescriptor {
        self.state.lock().unwrap().anchor
    }
}

impl PanelHandle for MemoryPanel {
    fn open(&self, on_ready: Box<dyn FnOnce() + Send>) {
        {
            let mut state = self.state.lock().unwrap();
            state.is_open = true;
            state.open_count += 1;
        }
        // Rendering and the enter animation complete synchronously.
        on_ready();
    }

    fn hide(&self) {
        let mut state = self.state.lock().unwrap();
        state.is_open = false;
        state.hide_count += 1;
    }

    fn update_position(&self, anchor: AnchorDescriptor) {
        self.state.lock().unwrap().anchor = anchor;
    }

    fn add_class(&self, class: &str) {
        let mut state = self.state.lock().unwrap();
        if !state.classes.iter().any(|c| c == class) {
            state.classes.push(class.to_owned());
        }
    }

    fn remove_class(&self, class: &str) {
        self.state.lock().unwrap().classes.retain(|c| c != class);
    }

    fn set_attribute(&self, name: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .attributes
            .insert(name.to_owned(), value.to_owned());
    }

    fn destroy(&self) {
        let mut state = self.state.lock().unwrap();
        state.is_open = false;
        state.destroy_count += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================
