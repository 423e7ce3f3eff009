//! Process-wide topic registry.
//!
//! One [`TopicManager`] per process owns every [`PublisherImpl`] and
//! [`SubscriberImpl`], keyed by resolved name, and ref-counts handles
//! acquired against the same name so they share one impl. Access it through
//! [`get_topic_manager`] rather than constructing one directly: a manager
//! reachable only via static initialization across translation units is a
//! footgun, so a lazily-initialized accessor over a single process-wide
//! `OnceLock` is used instead, without pulling in an extra crate for what
//! `std` already does.

use crate::error::{Error, Result};
use crate::message::Descriptor;
use crate::publisher::{PublisherImpl, PublisherStats};
use crate::registration::{NullRegistrationListener, RegistrationListener};
use crate::subscriber::{SubscriberImpl, SubscriberStats};
use crate::topic_impl::TopicImpl;
use crate::transport::{ConnectionStatsInfo, Direction};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

struct Inner {
    pubs: HashMap<String, Arc<PublisherImpl>>,
    subs: HashMap<String, Arc<SubscriberImpl>>,
}

/// A handle into the manager returned by the direction-generic accessors,
/// since a publisher impl and a subscriber impl are different Rust types
/// and can't be returned behind one non-generic signature any other way.
pub enum TopicImplHandle {
    Publisher(Arc<PublisherImpl>),
    Subscriber(Arc<SubscriberImpl>),
}

pub struct TopicManager {
    inner: Mutex<Inner>,
    registration_listener: Mutex<Arc<dyn RegistrationListener>>,
}

static MANAGER: OnceLock<TopicManager> = OnceLock::new();

/// Returns the process-wide topic manager, initializing it on first use.
pub fn get_topic_manager() -> &'static TopicManager {
    MANAGER.get_or_init(TopicManager::new)
}

impl TopicManager {
    fn new() -> Self {
        TopicManager {
            inner: Mutex::new(Inner {
                pubs: HashMap::new(),
                subs: HashMap::new(),
            }),
            registration_listener: Mutex::new(Arc::new(NullRegistrationListener)),
        }
    }

    pub fn set_registration_listener(&self, listener: Arc<dyn RegistrationListener>) {
        *self.registration_listener.lock() = listener;
    }

    /// Acquires a reference to the publisher impl for `resolved_name`,
    /// creating it if this is the first handle for that name. Returns an
    /// error if an existing impl's descriptor is incompatible.
    pub fn acquire_publisher(&self, resolved_name: &str, descriptor: Descriptor) -> Result<Arc<PublisherImpl>> {
        let mut inner = self.inner.lock();
        let is_new = !inner.pubs.contains_key(resolved_name);
        let impl_ = match inner.pubs.get(resolved_name) {
            Some(existing) => {
                if !existing.descriptor().is_compatible(&descriptor) {
                    return Err(Error::InvalidArgument(format!(
                        "topic [{resolved_name}] is already advertised with an incompatible message type"
                    )));
                }
                existing.clone()
            }
            None => {
                let created = PublisherImpl::new(TopicImpl::new(resolved_name.to_string(), descriptor));
                inner.pubs.insert(resolved_name.to_string(), created.clone());
                created
            }
        };
        impl_.increment_ref_count();
        drop(inner);

        if is_new {
            self.registration_listener
                .lock()
                .added(resolved_name, descriptor.type_name, Direction::Outbound);
        }
        Ok(impl_)
    }

    pub fn acquire_subscriber(&self, resolved_name: &str, descriptor: Descriptor) -> Result<Arc<SubscriberImpl>> {
        let mut inner = self.inner.lock();
        let is_new = !inner.subs.contains_key(resolved_name);
        let impl_ = match inner.subs.get(resolved_name) {
            Some(existing) => {
                if !existing.descriptor().is_compatible(&descriptor) {
                    return Err(Error::InvalidArgument(format!(
                        "topic [{resolved_name}] is already subscribed with an incompatible message type"
                    )));
                }
                existing.clone()
            }
            None => {
                let created = SubscriberImpl::new(TopicImpl::new(resolved_name.to_string(), descriptor));
                inner.subs.insert(resolved_name.to_string(), created.clone());
                created
            }
        };
        impl_.increment_ref_count();
        drop(inner);

        if is_new {
            self.registration_listener
                .lock()
                .added(resolved_name, descriptor.type_name, Direction::Inbound);
        }
        Ok(impl_)
    }

    /// Releases one reference to the publisher at `resolved_name`. Closes
    /// and removes the impl once the last reference is released.
    pub fn release_publisher(&self, resolved_name: &str) {
        let mut inner = self.inner.lock();
        let Some(impl_) = inner.pubs.get(resolved_name).cloned() else {
            return;
        };
        let remaining = impl_.decrement_ref_count();
        let type_name = impl_.descriptor().type_name;
        if remaining == 0 {
            inner.pubs.remove(resolved_name);
            drop(inner);
            impl_.close();
            self.registration_listener
                .lock()
                .removed(resolved_name, type_name, Direction::Outbound);
        }
    }

    pub fn release_subscriber(&self, resolved_name: &str) {
        let mut inner = self.inner.lock();
        let Some(impl_) = inner.subs.get(resolved_name).cloned() else {
            return;
        };
        let remaining = impl_.decrement_ref_count();
        let type_name = impl_.descriptor().type_name;
        if remaining == 0 {
            inner.subs.remove(resolved_name);
            drop(inner);
            impl_.close();
            self.registration_listener
                .lock()
                .removed(resolved_name, type_name, Direction::Inbound);
        }
    }

    pub fn has_publication(&self, resolved_name: &str) -> bool {
        self.inner.lock().pubs.contains_key(resolved_name)
    }

    pub fn has_subscription(&self, resolved_name: &str) -> bool {
        self.inner.lock().subs.contains_key(resolved_name)
    }

    pub fn get_publisher_impl(&self, resolved_name: &str) -> Option<Arc<PublisherImpl>> {
        self.inner.lock().pubs.get(resolved_name).cloned()
    }

    pub fn get_subscriber_impl(&self, resolved_name: &str) -> Option<Arc<SubscriberImpl>> {
        self.inner.lock().subs.get(resolved_name).cloned()
    }

    pub fn get_impl(&self, direction: Direction, resolved_name: &str) -> Option<TopicImplHandle> {
        match direction {
            Direction::Outbound => self.get_publisher_impl(resolved_name).map(TopicImplHandle::Publisher),
            Direction::Inbound => self.get_subscriber_impl(resolved_name).map(TopicImplHandle::Subscriber),
        }
    }

    /// Every currently registered topic name, published or subscribed to,
    /// deduplicated.
    pub fn get_topics(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut names: Vec<String> = inner.pubs.keys().chain(inner.subs.keys()).cloned().collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn get_publications(&self) -> Vec<(String, &'static str)> {
        self.inner
            .lock()
            .pubs
            .values()
            .map(|p| (p.resolved_name().to_string(), p.descriptor().type_name))
            .collect()
    }

    pub fn get_subscriptions(&self) -> Vec<(String, &'static str)> {
        self.inner
            .lock()
            .subs
            .values()
            .map(|s| (s.resolved_name().to_string(), s.descriptor().type_name))
            .collect()
    }

    pub fn get_pub_sub_info(&self) -> Vec<ConnectionStatsInfo> {
        let inner = self.inner.lock();
        let mut info = Vec::new();
        for p in inner.pubs.values() {
            info.extend(p.get_stats_info());
        }
        for s in inner.subs.values() {
            info.extend(s.get_stats_info());
        }
        info
    }

    pub fn pub_sub_stats(&self) -> (Vec<PublisherStats>, Vec<SubscriberStats>) {
        let inner = self.inner.lock();
        let pub_stats = inner.pubs.values().map(|p| p.get_stats()).collect();
        let sub_stats = inner.subs.values().map(|s| s.get_stats()).collect();
        (pub_stats, sub_stats)
    }

    /// Closes and forgets every topic impl, regardless of outstanding
    /// reference counts. Intended for process teardown.
    pub fn remove_all(&self) {
        let mut inner = self.inner.lock();
        let pubs = std::mem::take(&mut inner.pubs);
        let subs = std::mem::take(&mut inner.subs);
        drop(inner);
        for p in pubs.values() {
            p.close();
        }
        for s in subs.values() {
            s.close();
        }
    }
}
