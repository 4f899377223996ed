// Copyright 2020 nytopop (Eric Izoita)
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.
//! Named, lazily constructed, process-lifetime extension instances.
//!
//! # Extension Points
//! An extension point is a trait object type implementing [ExtensionPoint], which names
//! the point (the manifest key) and declares its default extension name. Implementations
//! are registered in a per-point table of factories, keyed by an identifier:
//!
//! ```
//! use brisk::{ExtensionPoint, ExtensionRegistry};
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! impl ExtensionPoint for dyn Greeter {
//!     const NAME: &'static str = "demo.Greeter";
//!     const DEFAULT: &'static str = "plain";
//! }
//!
//! struct Plain;
//!
//! impl Greeter for Plain {
//!     fn greet(&self) -> String {
//!         "hello".to_owned()
//!     }
//! }
//!
//! let registry = ExtensionRegistry::builder()
//!     .implementation::<dyn Greeter, _>("demo::Plain", |_| Ok(Arc::new(Plain)))
//!     .manifest::<dyn Greeter>("plain=demo::Plain")
//!     .build();
//!
//! let greeter = registry.loader::<dyn Greeter>()?.default_extension()?;
//! assert_eq!("hello", greeter.greet());
//! # Ok::<(), brisk::Error>(())
//! ```
//!
//! # Discovery
//! Names are bound to identifiers by line-oriented manifests (`name=identifier`, with
//! `#` comments). Manifest locations are scanned in the order they were added to the
//! [RegistryBuilder], and the **first** binding discovered for a name wins; later
//! bindings are logged and ignored. Discovery runs once per extension point, on first
//! use, and is all-or-nothing: one unresolvable identifier fails the whole scan (and
//! the scan is retried on next use).
//!
//! # Construction
//! Instances are built once per name, on first access, and cached for the lifetime of
//! the registry. Each name has its own initialization cell, so building one extension
//! never blocks lookups of another. Factories receive the registry, and may resolve
//! their own dependencies through it; circular dependencies are reported as
//! configuration errors. Failed constructions are not cached.
//!
//! Any identifier registered as a [wrapper](RegistryBuilder::wrapper) and bound in a
//! manifest decorates every other extension of the point, in discovery order.
mod builtins;
mod manifest;

use super::{
    error::{Error, Result},
    url::Url,
};
use fnv::FnvHashMap;
use log::{debug, info};
use manifest::Location;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::{
    any::{Any, TypeId},
    borrow::Cow,
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Weak},
    thread::{self, ThreadId},
};

/// Declares a trait object type as an extension point.
pub trait ExtensionPoint: Send + Sync + 'static {
    /// The fully qualified name of this extension point. Manifests for this point are
    /// looked up under this name.
    const NAME: &'static str;

    /// The default extension name. May be empty, in which case there is no default.
    const DEFAULT: &'static str;
}

type Ctor<T> = Arc<dyn Fn(&ExtensionRegistry) -> Result<Arc<T>> + Send + Sync>;
type WrapCtor<T> = Arc<dyn Fn(&ExtensionRegistry, Arc<T>) -> Result<Arc<T>> + Send + Sync>;

enum Factory<T: ?Sized> {
    Plain(Ctor<T>),
    Wrapper(WrapCtor<T>),
}

impl<T: ?Sized> Clone for Factory<T> {
    fn clone(&self) -> Self {
        match self {
            Factory::Plain(f) => Factory::Plain(Arc::clone(f)),
            Factory::Wrapper(f) => Factory::Wrapper(Arc::clone(f)),
        }
    }
}

/// Identifier → factory, for one extension point.
struct Table<T: ?Sized> {
    factories: HashMap<String, Factory<T>>,
}

impl<T: ?Sized> Default for Table<T> {
    fn default() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }
}

/// A builder for [ExtensionRegistry].
pub struct RegistryBuilder {
    tables: FnvHashMap<TypeId, Box<dyn Any + Send + Sync>>,
    locations: Vec<Location>,
}

impl RegistryBuilder {
    fn table<T: ExtensionPoint + ?Sized>(&mut self) -> &mut Table<T> {
        (self.tables.entry(TypeId::of::<T>()))
            .or_insert_with(|| Box::new(Table::<T>::default()))
            .downcast_mut()
            .expect("tables are keyed by type id")
    }

    /// Register a factory for an implementation of `T` under `identifier`.
    ///
    /// Registering an identifier twice replaces the earlier factory.
    pub fn implementation<T, F>(mut self, identifier: &str, factory: F) -> Self
    where
        T: ExtensionPoint + ?Sized,
        F: Fn(&ExtensionRegistry) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        (self.table::<T>().factories)
            .insert(identifier.to_owned(), Factory::Plain(Arc::new(factory)));
        self
    }

    /// Register a wrapper for `T` under `identifier`. A wrapper receives the instance it
    /// decorates as an argument.
    pub fn wrapper<T, F>(mut self, identifier: &str, factory: F) -> Self
    where
        T: ExtensionPoint + ?Sized,
        F: Fn(&ExtensionRegistry, Arc<T>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        (self.table::<T>().factories)
            .insert(identifier.to_owned(), Factory::Wrapper(Arc::new(factory)));
        self
    }

    /// Declare `T` as an extension point without registering any implementations.
    pub fn declare<T: ExtensionPoint + ?Sized>(mut self) -> Self {
        self.table::<T>();
        self
    }

    /// Add an inline manifest for `T` as the next discovery location.
    pub fn manifest<T: ExtensionPoint + ?Sized>(
        mut self,
        text: impl Into<Cow<'static, str>>,
    ) -> Self {
        self.locations.push(Location::Inline {
            point: T::NAME,
            text: text.into(),
        });
        self
    }

    /// Add a directory as the next discovery location. Manifests are read from files
    /// named after [ExtensionPoint::NAME]; missing files are skipped.
    pub fn location_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.locations.push(Location::Dir(dir.into()));
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<ExtensionRegistry> {
        let tables: FnvHashMap<TypeId, Arc<dyn Any + Send + Sync>> = (self.tables.into_iter())
            .map(|(id, t)| (id, Arc::from(t)))
            .collect();

        let locations: Arc<[Location]> = self.locations.into();

        Arc::new_cyclic(|this| ExtensionRegistry {
            this: this.clone(),
            tables,
            locations,
            loaders: RwLock::default(),
            construction: Mutex::default(),
        })
    }
}

/// A registry of extension points, their implementations, and cached instances.
///
/// A registry is an explicit value: create one at startup and hand it (or loaders
/// obtained from it) to whatever needs extensions.
pub struct ExtensionRegistry {
    this: Weak<ExtensionRegistry>,
    tables: FnvHashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    locations: Arc<[Location]>,
    loaders: RwLock<FnvHashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    construction: Mutex<Construction>,
}

impl ExtensionRegistry {
    /// Start building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            tables: FnvHashMap::default(),
            locations: Vec::new(),
        }
    }

    /// Returns a registry containing only the built-in extensions.
    pub fn with_builtins() -> Arc<Self> {
        Self::builder().with_builtins().build()
    }

    /// Returns the loader for extension point `T`, creating it on first access.
    ///
    /// Fails if nothing was ever registered or declared for `T`.
    pub fn loader<T: ExtensionPoint + ?Sized>(&self) -> Result<Arc<ExtensionLoader<T>>> {
        let id = TypeId::of::<T>();

        if let Some(loader) = self.loaders.read().get(&id) {
            return Ok(downcast_loader(loader));
        }

        if T::NAME.is_empty() {
            bail_config!("extension point {:?} has an empty name", std::any::type_name::<T>());
        }

        let table = match self.tables.get(&id) {
            Some(table) => Arc::clone(table)
                .downcast::<Table<T>>()
                .map_err(|_| Error::Configuration(format!("corrupt table for {}", T::NAME)))?,
            None => bail_config!("{} is not a registered extension point", T::NAME),
        };

        let mut loaders = self.loaders.write();
        let loader = loaders.entry(id).or_insert_with(|| {
            Arc::new(ExtensionLoader::<T> {
                registry: self.this.clone(),
                table,
                locations: Arc::clone(&self.locations),
                descriptor: OnceCell::new(),
                instances: RwLock::default(),
            })
        });

        Ok(downcast_loader(loader))
    }

    /// Shorthand for `self.loader::<T>()?.extension(name)`.
    pub fn extension<T: ExtensionPoint + ?Sized>(&self, name: &str) -> Result<Arc<T>> {
        self.loader::<T>()?.extension(name)
    }

    /// Shorthand for `self.loader::<T>()?.adaptive(key)`.
    pub fn adaptive<T: ExtensionPoint + ?Sized>(
        &self,
        key: &'static str,
    ) -> Result<AdaptiveExtension<T>> {
        Ok(self.loader::<T>()?.adaptive(key))
    }
}

fn downcast_loader<T: ExtensionPoint + ?Sized>(
    loader: &Arc<dyn Any + Send + Sync>,
) -> Arc<ExtensionLoader<T>> {
    Arc::clone(loader)
        .downcast()
        .unwrap_or_else(|_| unreachable!("loaders are keyed by type id"))
}

/// The result of scanning all locations for one extension point.
struct Descriptor<T: ?Sized> {
    names: Vec<String>,
    plain: HashMap<String, Ctor<T>>,
    wrappers: Vec<(String, WrapCtor<T>)>,
}

impl<T: ExtensionPoint + ?Sized> Descriptor<T> {
    fn scan(table: &Table<T>, locations: &[Location]) -> Result<Self> {
        let mut desc = Self {
            names: Vec::new(),
            plain: HashMap::new(),
            wrappers: Vec::new(),
        };

        for loc in locations {
            let text = match loc.read(T::NAME)? {
                Some(text) => text,
                None => continue,
            };

            for entry in manifest::parse(&text) {
                if entry.name.is_empty() {
                    bail_config!("{}: empty extension name at {}:{}", T::NAME, loc, entry.line);
                }

                if desc.plain.contains_key(entry.name)
                    || desc.wrappers.iter().any(|(n, _)| n == entry.name)
                {
                    debug!(
                        "{}: ignoring {}={} at {}:{}; already bound",
                        T::NAME,
                        entry.name,
                        entry.identifier,
                        loc,
                        entry.line
                    );
                    continue;
                }

                match table.factories.get(entry.identifier) {
                    Some(Factory::Plain(f)) => {
                        desc.names.push(entry.name.to_owned());
                        desc.plain.insert(entry.name.to_owned(), Arc::clone(f));
                    }

                    Some(Factory::Wrapper(f)) => {
                        desc.wrappers.push((entry.name.to_owned(), Arc::clone(f)));
                    }

                    None => bail_config!(
                        "{}: cannot resolve {}={} at {}:{}",
                        T::NAME,
                        entry.name,
                        entry.identifier,
                        loc,
                        entry.line
                    ),
                }
            }
        }

        Ok(desc)
    }
}

type Key = (TypeId, String);

/// Which thread is constructing which extension, and which extension each blocked
/// thread is waiting for.
#[derive(Default)]
struct Construction {
    builders: HashMap<Key, ThreadId>,
    waiting: HashMap<ThreadId, Key>,
}

/// Marks the current thread as waiting for an extension until dropped.
struct Waiting<'a> {
    graph: &'a Mutex<Construction>,
    thread: ThreadId,
}

impl<'a> Waiting<'a> {
    /// Fails if waiting for `name` would close a cycle, on this thread or across any
    /// number of threads blocked on each other.
    fn enter<T: ExtensionPoint + ?Sized>(
        graph: &'a Mutex<Construction>,
        name: &str,
    ) -> Result<Self> {
        let me = thread::current().id();
        let key = (TypeId::of::<T>(), name.to_owned());
        let mut g = graph.lock();

        let mut next = &key;
        for _ in 0..=g.builders.len() {
            let owner = match g.builders.get(next) {
                Some(owner) => owner,
                None => break,
            };

            if *owner == me {
                bail_config!("circular dependency while constructing {}:{}", T::NAME, name);
            }

            match g.waiting.get(owner) {
                Some(k) => next = k,
                None => break,
            }
        }

        g.waiting.insert(me, key);
        Ok(Waiting { graph, thread: me })
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.graph.lock().waiting.remove(&self.thread);
    }
}

/// Marks the current thread as the builder of an extension until dropped.
struct Building<'a> {
    graph: &'a Mutex<Construction>,
    key: Key,
}

impl<'a> Building<'a> {
    fn enter<T: ExtensionPoint + ?Sized>(graph: &'a Mutex<Construction>, name: &str) -> Self {
        let me = thread::current().id();
        let key = (TypeId::of::<T>(), name.to_owned());

        let mut g = graph.lock();
        g.waiting.remove(&me);
        g.builders.insert(key.clone(), me);

        Building { graph, key }
    }
}

impl Drop for Building<'_> {
    fn drop(&mut self) {
        self.graph.lock().builders.remove(&self.key);
    }
}

/// Resolves names to cached instances of one extension point.
pub struct ExtensionLoader<T: ?Sized> {
    registry: Weak<ExtensionRegistry>,
    table: Arc<Table<T>>,
    locations: Arc<[Location]>,
    descriptor: OnceCell<Descriptor<T>>,
    instances: RwLock<HashMap<String, Arc<OnceCell<Arc<T>>>>>,
}

impl<T: ExtensionPoint + ?Sized> ExtensionLoader<T> {
    fn descriptor(&self) -> Result<&Descriptor<T>> {
        self.descriptor
            .get_or_try_init(|| Descriptor::scan(&self.table, &self.locations))
    }

    fn cell(&self, name: &str) -> Arc<OnceCell<Arc<T>>> {
        if let Some(cell) = self.instances.read().get(name) {
            return Arc::clone(cell);
        }

        let mut instances = self.instances.write();
        Arc::clone(instances.entry(name.to_owned()).or_default())
    }

    /// Returns the declared default name, which may be empty.
    pub fn default_name(&self) -> &'static str {
        T::DEFAULT
    }

    /// Returns the instance bound to `name`, constructing it on first access. An empty
    /// name resolves to the [default name](ExtensionLoader::default_name).
    pub fn extension(&self, name: &str) -> Result<Arc<T>> {
        let name = match name {
            "" if T::DEFAULT.is_empty() => bail_config!("{} has no default extension", T::NAME),
            "" => T::DEFAULT,
            name => name,
        };

        let desc = self.descriptor()?;

        let ctor = match desc.plain.get(name) {
            Some(ctor) => Arc::clone(ctor),
            None => bail_config!(
                "no extension named {:?} for {}; supported: {:?}",
                name,
                T::NAME,
                desc.names
            ),
        };

        let cell = self.cell(name);

        if let Some(ext) = cell.get() {
            return Ok(Arc::clone(ext));
        }

        let registry = match self.registry.upgrade() {
            Some(r) => r,
            None => bail_config!("registry for {} has been dropped", T::NAME),
        };

        // blocking on a cell whose builder is (transitively) waiting on us never returns
        let _waiting = Waiting::enter::<T>(&registry.construction, name)?;

        cell.get_or_try_init(|| self.construct(&registry, name, &ctor, desc))
            .map(Arc::clone)
    }

    fn construct(
        &self,
        registry: &ExtensionRegistry,
        name: &str,
        ctor: &Ctor<T>,
        desc: &Descriptor<T>,
    ) -> Result<Arc<T>> {
        let _building = Building::enter::<T>(&registry.construction, name);

        let mut ext = ctor(registry)?;

        for (wrapper, wrap) in desc.wrappers.iter() {
            debug!("{}: wrapping {} with {}", T::NAME, name, wrapper);
            ext = wrap(registry, ext)?;
        }

        info!("constructed extension {}:{}", T::NAME, name);
        Ok(ext)
    }

    /// Returns the instance bound to the default name.
    pub fn default_extension(&self) -> Result<Arc<T>> {
        self.extension(T::DEFAULT)
    }

    /// Returns every discovered (non-wrapper) name, in discovery order.
    pub fn supported_extensions(&self) -> Result<Vec<String>> {
        Ok(self.descriptor()?.names.clone())
    }

    /// Returns true if `name` is bound to a (non-wrapper) extension.
    pub fn has_extension(&self, name: &str) -> Result<bool> {
        Ok(self.descriptor()?.plain.contains_key(name))
    }

    /// Returns every instance constructed so far, without constructing anything.
    pub fn loaded_extensions(&self) -> Vec<Arc<T>> {
        (self.instances.read().values())
            .filter_map(|cell| cell.get().map(Arc::clone))
            .collect()
    }

    /// Returns a handle that picks an extension per call, by reading `key` from a url.
    pub fn adaptive(self: &Arc<Self>, key: &'static str) -> AdaptiveExtension<T> {
        AdaptiveExtension {
            loader: Arc::clone(self),
            key,
        }
    }
}

/// Defers the choice of extension to call time, keyed by a url parameter.
pub struct AdaptiveExtension<T: ?Sized> {
    loader: Arc<ExtensionLoader<T>>,
    key: &'static str,
}

impl<T: ?Sized> Clone for AdaptiveExtension<T> {
    fn clone(&self) -> Self {
        Self {
            loader: Arc::clone(&self.loader),
            key: self.key,
        }
    }
}

impl<T: ExtensionPoint + ?Sized> AdaptiveExtension<T> {
    /// Returns the url parameter this adaptive extension reads.
    pub fn key(&self) -> &'static str {
        self.key
    }

    /// Returns the extension named by the url parameter, or the default extension if
    /// the parameter is unset.
    pub fn resolve(&self, url: &Url) -> Result<Arc<T>> {
        self.resolve_name(url.param(self.key))
    }

    /// Returns the extension named `name`, or the default extension for `None`.
    pub fn resolve_name(&self, name: Option<&str>) -> Result<Arc<T>> {
        self.loader.extension(name.unwrap_or(""))
    }

    /// Returns the underlying loader.
    pub fn loader(&self) -> &Arc<ExtensionLoader<T>> {
        &self.loader
    }
}
