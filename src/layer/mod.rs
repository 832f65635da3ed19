//! Layer runtime — generic layered state machines with typed
//! inter-layer messaging, instance state and event sourcing.
//!
//! This is deliberately generic over the message type `M` so the same
//! runtime backs the BLE stack and the smaller 802.15.4/Zigbee/Mesh/
//! ESB stacks, each with their own message enum. Cyclic layer↔manager
//! references become a parent-owns-child tree with a non-owning (`Weak`)
//! back-reference for lookups, and hook/callback-style dispatch becomes
//! direct typed calls on [`Layer::on_message`].

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

/// A named unit of the stack. `S` is the layer's own persistent state type
/// (use `()` for stateless layers).
pub trait Layer<M>: Send + Sync {
    fn alias(&self) -> String;

    /// Called once when the layer's instance is attached to the runtime.
    fn on_init(&self, _instance: &Instance<M>) {}

    /// Called for every message delivered on a channel this instance
    /// subscribes to. `source` is the alias of the instance path segment
    /// that published it.
    fn on_message(&self, instance: &Instance<M>, source: &str, channel: &str, message: M);

    /// Called when the instance is torn down, before its children are.
    fn on_terminate(&self, _instance: &Instance<M>) {}
}

/// One delivered message, recorded when tracing is enabled.
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub source_path: String,
    pub channel: String,
    pub delivered_to: Vec<String>,
}

struct RuntimeInner<M> {
    /// subscriber instances keyed by the `(source_alias, channel)` tuple
    /// they subscribe to.
    subscribers: RwLock<HashMap<(String, String), Vec<Weak<Instance<M>>>>>,
    tracing: std::sync::atomic::AtomicBool,
    event_log: Mutex<Vec<TraceEvent>>,
}

/// Owns the one root layer and the dynamic forest of child instances.
pub struct Runtime<M> {
    inner: Arc<RuntimeInner<M>>,
    root: Arc<Instance<M>>,
}

impl<M: Send + 'static> Runtime<M> {
    pub fn new(root_layer: Arc<dyn Layer<M>>) -> Self {
        let inner = Arc::new(RuntimeInner {
            subscribers: RwLock::new(HashMap::new()),
            tracing: std::sync::atomic::AtomicBool::new(false),
            event_log: Mutex::new(Vec::new()),
        });
        let alias = root_layer.alias();
        let root = Instance::new(Arc::clone(&inner), None, alias, root_layer, Vec::new());
        root.layer.on_init(&root);
        Self { inner, root }
    }

    pub fn root(&self) -> &Arc<Instance<M>> {
        &self.root
    }

    pub fn set_tracing(&self, enabled: bool) {
        self.inner
            .tracing
            .store(enabled, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn event_log(&self) -> Vec<TraceEvent> {
        self.inner.event_log.lock().clone()
    }
}

/// One node of the instance tree. Instance identity is the path from root
///: `path()` returns `root/child/grandchild`-style dotted alias
/// chain.
pub struct Instance<M> {
    runtime: Arc<RuntimeInner<M>>,
    parent: Option<Weak<Instance<M>>>,
    alias: String,
    layer: Arc<dyn Layer<M>>,
    children: RwLock<HashMap<String, Arc<Instance<M>>>>,
    self_ref: Mutex<Weak<Instance<M>>>,
}

impl<M: Send + 'static> Instance<M> {
    fn new(
        runtime: Arc<RuntimeInner<M>>,
        parent: Option<Weak<Instance<M>>>,
        alias: String,
        layer: Arc<dyn Layer<M>>,
        subscriptions: Vec<(String, String)>,
    ) -> Arc<Self> {
        let instance = Arc::new(Self {
            runtime: Arc::clone(&runtime),
            parent,
            alias,
            layer,
            children: RwLock::new(HashMap::new()),
            self_ref: Mutex::new(Weak::new()),
        });
        *instance.self_ref.lock() = Arc::downgrade(&instance);

        let mut subs = runtime.subscribers.write();
        for key in subscriptions {
            subs.entry(key)
                .or_default()
                .push(Arc::downgrade(&instance));
        }
        instance
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn path(&self) -> String {
        match &self.parent {
            Some(p) => match p.upgrade() {
                Some(parent) => format!("{}/{}", parent.path(), self.alias),
                None => self.alias.clone(),
            },
            None => self.alias.clone(),
        }
    }

    /// Creates a child instance (e.g. one ATT instance per connection
    /// handle). The child is initialized immediately and torn down
    /// recursively by [`Instance::terminate`].
    pub fn create_child(
        self: &Arc<Self>,
        alias: impl Into<String>,
        layer: Arc<dyn Layer<M>>,
        subscriptions: Vec<(String, String)>,
    ) -> Arc<Instance<M>> {
        let alias = alias.into();
        let child = Instance::new(
            Arc::clone(&self.runtime),
            Some(Arc::downgrade(self)),
            alias.clone(),
            layer,
            subscriptions,
        );
        child.layer.on_init(&child);
        self.children.write().insert(alias, Arc::clone(&child));
        child
    }

    pub fn child(&self, alias: &str) -> Option<Arc<Instance<M>>> {
        self.children.read().get(alias).cloned()
    }

    pub fn remove_child(&self, alias: &str) {
        if let Some(child) = self.children.write().remove(alias) {
            child.terminate();
        }
    }

    /// Publishes `message` on `channel`; every subscriber of
    /// `(self.alias(), channel)` receives it, in subscription order.
    pub fn publish(&self, channel: &str, message: M)
    where
        M: Clone,
    {
        let key = (self.alias.clone(), channel.to_string());
        let subscribers = {
            let subs = self.runtime.subscribers.read();
            subs.get(&key).cloned().unwrap_or_default()
        };

        let mut delivered_to = Vec::new();
        for weak in &subscribers {
            if let Some(instance) = weak.upgrade() {
                delivered_to.push(instance.path());
                instance
                    .layer
                    .on_message(&instance, &self.alias, channel, message.clone());
            }
        }

        if self
            .runtime
            .tracing
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            self.runtime.event_log.lock().push(TraceEvent {
                source_path: self.path(),
                channel: channel.to_string(),
                delivered_to,
            });
        }
    }

    /// Tears down this instance's children recursively, then calls the
    /// layer's termination hook.
    pub fn terminate(self: &Arc<Self>) {
        let children: Vec<Arc<Instance<M>>> = self.children.write().drain().map(|(_, v)| v).collect();
        for child in children {
            child.terminate();
        }
        self.layer.on_terminate(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    enum TestMsg {
        Ping,
        Pong,
    }

    struct Root {
        received: Arc<AtomicUsize>,
    }
    impl Layer<TestMsg> for Root {
        fn alias(&self) -> String {
            "root".into()
        }
        fn on_message(&self, _i: &Instance<TestMsg>, _s: &str, _c: &str, _m: TestMsg) {}
    }

    struct Child {
        received: Arc<AtomicUsize>,
    }
    impl Layer<TestMsg> for Child {
        fn alias(&self) -> String {
            "child".into()
        }
        fn on_message(&self, _i: &Instance<TestMsg>, _source: &str, _channel: &str, message: TestMsg) {
            if message == TestMsg::Ping {
                self.received.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn publishes_to_subscribers_and_traces() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = Runtime::new(Arc::new(Root {
            received: Arc::clone(&counter),
        }));
        runtime.set_tracing(true);

        let root = runtime.root().clone();
        let _child = root.create_child(
            "conn5",
            Arc::new(Child {
                received: Arc::clone(&counter),
            }),
            vec![("root".to_string(), "events".to_string())],
        );

        root.publish("events", TestMsg::Ping);
        root.publish("events", TestMsg::Pong);

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let log = runtime.event_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].delivered_to, vec!["root/conn5".to_string()]);
    }

    #[test]
    fn terminate_tears_down_children_recursively() {
        let counter = Arc::new(AtomicUsize::new(0));
        let runtime = Runtime::new(Arc::new(Root {
            received: Arc::clone(&counter),
        }));
        let root = runtime.root().clone();
        let child = root.create_child(
            "conn5",
            Arc::new(Child {
                received: Arc::clone(&counter),
            }),
            vec![],
        );
        let _grandchild = child.create_child(
            "att",
            Arc::new(Child {
                received: Arc::clone(&counter),
            }),
            vec![],
        );
        assert!(root.child("conn5").is_some());
        root.remove_child("conn5");
        assert!(root.child("conn5").is_none());
    }
}
