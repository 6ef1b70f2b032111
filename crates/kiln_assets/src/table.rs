//! The generic hash-keyed asset table.
//!
//! An [`AssetTable`] maps identifier hashes to an active instance and an
//! optional pending replacement, tracks at most one in-flight compile per
//! hash, and lets divergent (locally edited) overlays shadow committed
//! entries.
//!
//! The table is guarded by a reentrant lock. Constructors run with the lock
//! held but without any borrow of the table state, so a constructor may
//! resolve other assets from the same table; every insertion point is found
//! again after construction returns.

use std::cell::RefCell;
use std::sync::{Arc, Weak};

use kiln_common::{AssetHash, AssetId};
use kiln_config::AssetsConfig;
use parking_lot::ReentrantMutex;

use crate::asset::{Asset, Construction, DependencyCheck};
use crate::divergent::{DivergentAsset, DivergentIdentifier};
use crate::error::{AssetError, IntoResolved, Resolved};
use crate::marker::{AssetState, CompileMarker, PendingCompile};
use crate::names::NameRegistry;
use crate::services::AssetServices;

/// Per-table behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// Dependency check used by [`AssetTable::resolve`].
    pub check: DependencyCheck,
    /// Record a descriptive name for every constructed hash.
    pub track_names: bool,
    /// Polls of a pending compile allowed before it is declared invalid.
    pub retry_budget: Option<u32>,
}

impl TableOptions {
    /// Options from the `[assets]` config section.
    pub fn from_config(config: &AssetsConfig) -> Self {
        Self {
            check: DependencyCheck::from_flag(config.check_dependencies),
            track_names: config.track_names,
            retry_budget: config.retry_budget,
        }
    }
}

impl Default for TableOptions {
    fn default() -> Self {
        Self::from_config(&AssetsConfig::default())
    }
}

struct Slot<A> {
    active: Option<Arc<A>>,
    pending: Option<Arc<A>>,
}

struct ActiveCompile {
    handle: Arc<PendingCompile>,
    polls: u32,
}

struct TableState<A> {
    assets: Vec<(AssetHash, Slot<A>)>,
    compiles: Vec<(AssetHash, ActiveCompile)>,
    divergent: Vec<(AssetHash, Arc<DivergentAsset<A>>)>,
}

impl<A> Default for TableState<A> {
    fn default() -> Self {
        Self {
            assets: Vec::new(),
            compiles: Vec::new(),
            divergent: Vec::new(),
        }
    }
}

fn find<V>(entries: &[(AssetHash, V)], hash: AssetHash) -> Result<usize, usize> {
    entries.binary_search_by_key(&hash, |(h, _)| *h)
}

impl<A> TableState<A> {
    fn slot_mut(&mut self, hash: AssetHash) -> &mut Slot<A> {
        let index = match find(&self.assets, hash) {
            Ok(index) => index,
            Err(pos) => {
                self.assets.insert(
                    pos,
                    (
                        hash,
                        Slot {
                            active: None,
                            pending: None,
                        },
                    ),
                );
                pos
            }
        };
        &mut self.assets[index].1
    }

    fn compile(&self, hash: AssetHash) -> Option<Arc<PendingCompile>> {
        let index = find(&self.compiles, hash).ok()?;
        Some(Arc::clone(&self.compiles[index].1.handle))
    }

    fn remove_compile(&mut self, hash: AssetHash) -> Option<ActiveCompile> {
        let index = find(&self.compiles, hash).ok()?;
        Some(self.compiles.remove(index).1)
    }

    fn divergent(&self, hash: AssetHash) -> Option<Arc<DivergentAsset<A>>> {
        let index = find(&self.divergent, hash).ok()?;
        Some(Arc::clone(&self.divergent[index].1))
    }
}

type TableCell<A> = RefCell<TableState<A>>;

/// Hash-keyed cache of one asset kind with compile-on-demand.
pub struct AssetTable<A: Asset> {
    state: ReentrantMutex<TableCell<A>>,
    names: Option<NameRegistry>,
    options: TableOptions,
    services: Weak<AssetServices>,
}

impl<A: Asset> AssetTable<A> {
    pub(crate) fn new(services: Weak<AssetServices>, options: TableOptions) -> Self {
        Self {
            state: ReentrantMutex::new(RefCell::new(TableState::default())),
            names: options.track_names.then(NameRegistry::new),
            options,
            services,
        }
    }

    /// The options this table was created with.
    pub fn options(&self) -> TableOptions {
        self.options
    }

    /// Resolves `id` with the table's default dependency check.
    pub fn resolve(&self, id: &AssetId) -> Result<Arc<A>, AssetError> {
        self.resolve_with(id, self.options.check)
    }

    /// Like [`AssetTable::resolve`], with `Pending` and `Invalid` returned as
    /// [`Resolved`] states instead of errors.
    pub fn poll(&self, id: &AssetId) -> Result<Resolved<Arc<A>>, AssetError> {
        self.resolve(id).into_resolved()
    }

    /// Resolves `id`, returning the ready asset or a `Pending`/`Invalid`
    /// error.
    ///
    /// A divergent overlay with local changes shadows the committed asset and
    /// is returned without any dependency check. A cached asset whose token
    /// has advanced is reconstructed; the replacement takes over once it is
    /// ready for replacement, and the previous instance stays alive for
    /// anyone still holding it.
    pub fn resolve_with(&self, id: &AssetId, check: DependencyCheck) -> Result<Arc<A>, AssetError> {
        let hash = id.hash();
        let guard = self.state.lock();
        let cell: &TableCell<A> = &guard;

        let overlay = cell.borrow().divergent(hash);
        if let Some(overlay) = overlay {
            if overlay.has_changes() {
                return Ok(overlay.asset());
            }
        }

        let cached = {
            let state = cell.borrow();
            find(&state.assets, hash).ok().map(|index| {
                let slot = &state.assets[index].1;
                (slot.active.clone(), slot.pending.clone())
            })
        };
        let Some((active, pending)) = cached else {
            return self.insert_new(cell, id, hash);
        };

        if check.needs_refresh(pending.as_deref().or(active.as_deref())) {
            cell.borrow_mut().slot_mut(hash).pending = None;
            let replacement = match self.construct(cell, id, hash) {
                Ok(asset) => asset,
                Err(err) if err.is_recoverable() && A::CONSTRUCTION == Construction::Orchestrated => {
                    log::warn!("asset {} unusable ({err}), recompiling", id.descriptive_name());
                    return Err(self.force_compile(cell, id, hash));
                }
                Err(err) => return Err(err),
            };
            cell.borrow_mut().slot_mut(hash).pending = Some(Arc::new(replacement));
        }

        let mut state = cell.borrow_mut();
        let slot = state.slot_mut(hash);
        let promote = slot.active.is_none()
            || slot
                .pending
                .as_ref()
                .is_some_and(|pending| pending.ready_for_replacement());
        if promote {
            if let Some(pending) = slot.pending.take() {
                log::debug!("promoting replacement for {}", id.descriptive_name());
                slot.active = Some(pending);
            }
        }
        slot.active
            .clone()
            .ok_or_else(|| AssetError::pending(id.descriptive_name(), "replacement not ready"))
    }

    /// Returns the divergent overlay for `id`, creating it on first request.
    ///
    /// If the committed asset is invalid, a blank one is created with
    /// [`Asset::create_new`] and committed in its place. Pending and hard
    /// errors propagate.
    pub fn divergent(&self, id: &AssetId) -> Result<Arc<DivergentAsset<A>>, AssetError> {
        let hash = id.hash();
        let guard = self.state.lock();
        let cell: &TableCell<A> = &guard;

        if let Some(existing) = cell.borrow().divergent(hash) {
            return Ok(existing);
        }

        let baseline = match self.resolve_with(id, DependencyCheck::Always) {
            Ok(asset) => asset,
            Err(err) if err.is_invalid() => {
                let services = self.services(id)?;
                let fresh = Arc::new(A::create_new(id, &services)?);
                let slot_asset = Arc::clone(&fresh);
                {
                    let mut state = cell.borrow_mut();
                    state.remove_compile(hash);
                    let slot = state.slot_mut(hash);
                    slot.active = Some(slot_asset);
                    slot.pending = None;
                }
                if let Some(names) = &self.names {
                    names.insert_no_collision(hash, &id.descriptive_name());
                }
                fresh
            }
            Err(err) => return Err(err),
        };

        let mut state = cell.borrow_mut();
        match find(&state.divergent, hash) {
            Ok(index) => Ok(Arc::clone(&state.divergent[index].1)),
            Err(pos) => {
                let overlay = Arc::new(DivergentAsset::new(
                    hash,
                    DivergentIdentifier::from_id(id),
                    baseline,
                ));
                state.divergent.insert(pos, (hash, Arc::clone(&overlay)));
                Ok(overlay)
            }
        }
    }

    /// Drops a failed compile for `id` so the next resolve compiles again.
    /// Returns `false` if there was no failed compile.
    pub fn retry(&self, id: &AssetId) -> bool {
        let hash = id.hash();
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        let failed = state
            .compile(hash)
            .is_some_and(|handle| handle.asset_state() == AssetState::Invalid);
        if failed {
            state.remove_compile(hash);
            log::debug!("released failed compile for {}", id.descriptive_name());
        }
        failed
    }

    /// Drops every cached asset, overlay, in-flight compile and name.
    ///
    /// Instances already handed out stay valid.
    pub fn clear(&self) {
        let guard = self.state.lock();
        *guard.borrow_mut() = TableState::default();
        if let Some(names) = &self.names {
            names.clear();
        }
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.state.lock().borrow().assets.len()
    }

    /// Returns `true` if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of in-flight compiles tracked by the table.
    pub fn pending_compiles(&self) -> usize {
        self.state.lock().borrow().compiles.len()
    }

    /// Rust type name of the asset kind.
    pub fn type_name(&self) -> &'static str {
        std::any::type_name::<A>()
    }

    /// Stable code for the asset kind, derived from its type name.
    pub fn type_code(&self) -> u64 {
        AssetHash::of_str(self.type_name()).as_raw()
    }

    /// Number of divergent overlays.
    pub fn divergent_count(&self) -> usize {
        self.state.lock().borrow().divergent.len()
    }

    /// Hash of the `index`th divergent overlay, in hash order.
    pub fn divergent_id(&self, index: usize) -> Option<AssetHash> {
        self.state
            .lock()
            .borrow()
            .divergent
            .get(index)
            .map(|(hash, _)| *hash)
    }

    /// Whether the `index`th divergent overlay has local changes.
    pub fn divergent_has_changes(&self, index: usize) -> bool {
        self.state
            .lock()
            .borrow()
            .divergent
            .get(index)
            .is_some_and(|(_, overlay)| overlay.has_changes())
    }

    /// Name recorded for `hash`, if names are tracked.
    pub fn asset_name(&self, hash: AssetHash) -> Option<String> {
        self.names.as_ref()?.name(hash)
    }

    /// One header line plus one line per committed entry.
    pub fn report(&self) -> Vec<String> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut lines = Vec::with_capacity(state.assets.len() + 1);
        lines.push(format!(
            "{} assets of type {}",
            state.assets.len(),
            self.type_name()
        ));
        for (index, (hash, _)) in state.assets.iter().enumerate() {
            let name = self
                .asset_name(*hash)
                .unwrap_or_else(|| format!("Unnamed asset with hash ({hash})"));
            lines.push(format!("[{index}] {name}"));
        }
        lines
    }

    /// Writes [`AssetTable::report`] to the log at info level.
    pub fn log_report(&self) {
        for line in self.report() {
            log::info!("{line}");
        }
    }

    fn services(&self, id: &AssetId) -> Result<Arc<AssetServices>, AssetError> {
        self.services
            .upgrade()
            .ok_or_else(|| AssetError::invalid(id.descriptive_name(), "asset services were dropped"))
    }

    fn prepare(&self, services: &AssetServices, id: &AssetId) -> Result<Arc<dyn CompileMarker>, AssetError> {
        services
            .compilers()
            .prepare_asset(A::COMPILE_PROCESS_TYPE, &id.as_strs())
            .ok_or_else(|| {
                AssetError::invalid(
                    id.descriptive_name(),
                    format!("no compiler for type code {:#x}", A::COMPILE_PROCESS_TYPE),
                )
            })
    }

    fn insert_new(&self, cell: &TableCell<A>, id: &AssetId, hash: AssetHash) -> Result<Arc<A>, AssetError> {
        let asset = Arc::new(self.construct(cell, id, hash)?);
        if let Some(names) = &self.names {
            names.insert(hash, &id.descriptive_name());
        }
        let mut state = cell.borrow_mut();
        let slot = state.slot_mut(hash);
        slot.active = Some(Arc::clone(&asset));
        slot.pending = None;
        Ok(asset)
    }

    fn construct(&self, cell: &TableCell<A>, id: &AssetId, hash: AssetHash) -> Result<A, AssetError> {
        let services = self.services(id)?;
        match A::CONSTRUCTION {
            Construction::Immediate => A::from_initializers(id, &services),
            Construction::Direct => {
                let marker = self.prepare(&services, id)?;
                A::from_marker(marker, id, &services)
            }
            Construction::Orchestrated => self.construct_orchestrated(cell, id, hash, &services),
        }
    }

    fn construct_orchestrated(
        &self,
        cell: &TableCell<A>,
        id: &AssetId,
        hash: AssetHash,
        services: &AssetServices,
    ) -> Result<A, AssetError> {
        let in_flight = cell.borrow().compile(hash);
        if let Some(handle) = in_flight {
            match handle.asset_state() {
                AssetState::Pending => return Err(self.note_pending_poll(cell, hash, &handle)),
                AssetState::Invalid => {
                    let sources_changed = handle
                        .failure_validation()
                        .is_some_and(|validation| !validation.is_valid());
                    if !sources_changed {
                        return Err(AssetError::invalid(
                            handle.initializer(),
                            handle.failure().unwrap_or_default(),
                        ));
                    }
                    log::debug!("sources of failed compile {} changed", handle.initializer());
                    cell.borrow_mut().remove_compile(hash);
                }
                AssetState::Ready => {
                    let locator = handle.locator().ok_or_else(|| {
                        AssetError::invalid(handle.initializer(), "compile finished without a locator")
                    })?;
                    // An error here leaves the compile in place, so later
                    // resolves fail the same way.
                    let asset = A::from_locator(&locator, id, services)?;
                    cell.borrow_mut().remove_compile(hash);
                    return Ok(asset);
                }
            }
        }

        let marker = self.prepare(services, id)?;
        if let Some(locator) = marker.existing_asset().filter(|l| l.is_current()) {
            match A::from_locator(&locator, id, services) {
                Ok(asset) => return Ok(asset),
                Err(err) if err.is_recoverable() || err.is_invalid() => {
                    log::warn!("stored artifact {} unusable ({err}), recompiling", locator.source_id());
                }
                Err(err) => return Err(err),
            }
        }
        Err(self.begin_compile(cell, hash, marker.as_ref()))
    }

    /// Starts a compile unless one is already tracked for `hash`, and returns
    /// the `Pending` error to raise.
    fn begin_compile(&self, cell: &TableCell<A>, hash: AssetHash, marker: &dyn CompileMarker) -> AssetError {
        if let Some(handle) = cell.borrow().compile(hash) {
            return AssetError::pending(handle.initializer(), "compile still pending");
        }
        let handle = marker.invoke_compile();
        let initializer = handle.initializer().to_string();
        let mut state = cell.borrow_mut();
        if let Err(pos) = find(&state.compiles, hash) {
            state
                .compiles
                .insert(pos, (hash, ActiveCompile { handle, polls: 0 }));
        }
        AssetError::pending(initializer, "pending recompile")
    }

    fn force_compile(&self, cell: &TableCell<A>, id: &AssetId, hash: AssetHash) -> AssetError {
        cell.borrow_mut().remove_compile(hash);
        let marker = match self.services(id).and_then(|services| self.prepare(&services, id)) {
            Ok(marker) => marker,
            Err(err) => return err,
        };
        self.begin_compile(cell, hash, marker.as_ref())
    }

    fn note_pending_poll(&self, cell: &TableCell<A>, hash: AssetHash, handle: &PendingCompile) -> AssetError {
        let polls = {
            let mut state = cell.borrow_mut();
            match find(&state.compiles, hash) {
                Ok(index) => {
                    let compile = &mut state.compiles[index].1;
                    compile.polls = compile.polls.saturating_add(1);
                    compile.polls
                }
                Err(_) => 0,
            }
        };
        if let Some(budget) = self.options.retry_budget {
            if polls > budget {
                let reason = format!("compile still pending after {budget} polls");
                if handle.fail(reason.clone(), None) {
                    log::warn!("giving up on {}: {reason}", handle.initializer());
                    return AssetError::invalid(handle.initializer(), reason);
                }
            }
        }
        AssetError::pending(handle.initializer(), "compile still pending")
    }
}

/// Type-erased view of a table, for operations that span every asset kind.
pub(crate) trait ErasedTable: Send + Sync {
    fn clear(&self);
    fn log_report(&self);
}

impl<A: Asset> ErasedTable for AssetTable<A> {
    fn clear(&self) {
        AssetTable::clear(self);
    }

    fn log_report(&self) {
        AssetTable::log_report(self);
    }
}
