//! Low-level IndexedDB helpers using web-sys
//!
//! Wraps the callback-based IndexedDB API into Rust futures using
//! `wasm_bindgen_futures::JsFuture` and `js_sys::Promise`.

use js_sys::Promise;
use std::cell::RefCell;
use std::rc::Rc;
use stowage_core::engine::{SchemaTarget, UpgradeAction, UpgradePlan};
use stowage_core::schema::{IndexSpec, KeyConfig};
use stowage_core::StoreError;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbDatabase, IdbFactory, IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbTransactionMode,
    IdbVersionChangeEvent,
};

use crate::error::{IndexedDbError, Result};

type EventClosure = Closure<dyn FnMut(web_sys::Event)>;

/// Handler kept alive for as long as its connection is open.
pub type VersionChangeClosure = Closure<dyn FnMut(IdbVersionChangeEvent)>;

/// Type alias for upgrade closure to reduce complexity
type UpgradeClosure = Rc<RefCell<Option<Closure<dyn FnMut(IdbVersionChangeEvent)>>>>;

/// What the upgrade handler decided, if it ran.
type UpgradeOutcome = Rc<RefCell<Option<std::result::Result<UpgradeAction, StoreError>>>>;

/// Get the global IndexedDB factory.
pub fn idb_factory() -> Result<IdbFactory> {
    let global = js_sys::global();

    let idb: JsValue = js_sys::Reflect::get(&global, &"indexedDB".into())
        .map_err(|_| IndexedDbError::NotAvailable("no indexedDB on global".into()))?;

    if idb.is_undefined() || idb.is_null() {
        return Err(IndexedDbError::NotAvailable(
            "indexedDB is null/undefined".into(),
        ));
    }

    idb.dyn_into::<IdbFactory>()
        .map_err(|_| IndexedDbError::NotAvailable("indexedDB is not IdbFactory".into()))
}

/// Convert the next outcome of an IdbRequest into a JS Promise.
///
/// Resolves with the request's result; rejects with its `DOMException`. A cursor
/// request fires once per step, so a fresh promise is needed after every
/// `continue()`.
fn request_to_promise(req: &IdbRequest) -> Promise {
    let req_success = req.clone();
    let req_error = req.clone();

    Promise::new(&mut move |resolve, reject| {
        // Store closures in Rc<RefCell> to manage their lifetime without leaking
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let req_s = req_success.clone();
        let closures_for_success = closures.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let result = req_s.result().unwrap_or(JsValue::UNDEFINED);
            let _ = resolve.call1(&JsValue::UNDEFINED, &result);
            *closures_for_success.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req_error.clone();
        let closures_for_error = closures.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let error = match req_e.error() {
                Ok(Some(ex)) => JsValue::from(ex),
                _ => JsValue::from_str("unknown IDB error"),
            };
            let _ = reject.call1(&JsValue::UNDEFINED, &error);
            *closures_for_error.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        req_success.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req_error.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        // Keep both closures alive until one fires
        *closures.borrow_mut() = Some((on_success, on_error));
    })
}

/// Convert an IdbTransaction's completion into a JS Promise.
///
/// Must be created before the transaction can finish, i.e. right after it is
/// started, or the `complete` event is missed.
pub fn transaction_to_promise(tx: &IdbTransaction) -> Promise {
    let tx = tx.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let closures_for_complete = closures.clone();
        let on_complete = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            *closures_for_complete.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        // A failed request that is not handled aborts the transaction
        let tx_e = tx.clone();
        let closures_for_abort = closures.clone();
        let on_abort = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let error = tx_e
                .error()
                .map(JsValue::from)
                .unwrap_or_else(|| JsValue::from_str("transaction aborted"));
            let _ = reject.call1(&JsValue::UNDEFINED, &error);
            *closures_for_abort.borrow_mut() = None;
        }) as Box<dyn FnMut(web_sys::Event)>);

        tx.set_oncomplete(Some(on_complete.as_ref().unchecked_ref()));
        tx.set_onabort(Some(on_abort.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_complete, on_abort));
    })
}

/// Schema mutations inside a `versionchange` transaction.
struct UpgradeSchema {
    db: IdbDatabase,
    tx: IdbTransaction,
}

impl UpgradeSchema {
    fn from_event(event: &IdbVersionChangeEvent) -> std::result::Result<Self, StoreError> {
        let req: IdbOpenDbRequest = event
            .target()
            .ok_or_else(|| StoreError::DbInit("upgrade event has no target".into()))?
            .unchecked_into();
        let db: IdbDatabase = req
            .result()
            .map_err(|e| StoreError::from(IndexedDbError::from_dom(e)))?
            .unchecked_into();
        let tx = req
            .transaction()
            .ok_or_else(|| StoreError::DbInit("upgrade has no versionchange transaction".into()))?;
        Ok(Self { db, tx })
    }
}

fn set_property(target: &JsValue, name: &str, value: &JsValue) -> std::result::Result<(), StoreError> {
    js_sys::Reflect::set(target, &name.into(), value)
        .map(|_| ())
        .map_err(|e| StoreError::from(IndexedDbError::from(e)))
}

impl SchemaTarget for UpgradeSchema {
    fn has_object_store(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn create_object_store(
        &mut self,
        name: &str,
        key_config: &KeyConfig,
    ) -> std::result::Result<(), StoreError> {
        let params = web_sys::IdbObjectStoreParameters::new();
        if let Some(key_path) = key_config.key_path() {
            set_property(&params, "keyPath", &key_path.into())?;
        }
        set_property(
            &params,
            "autoIncrement",
            &JsValue::from_bool(key_config.auto_increment),
        )?;
        self.db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(|e| StoreError::from(IndexedDbError::from_dom(e)))?;
        Ok(())
    }

    fn create_index(
        &mut self,
        store_name: &str,
        index: &IndexSpec,
    ) -> std::result::Result<(), StoreError> {
        let store = self
            .tx
            .object_store(store_name)
            .map_err(|e| StoreError::from(IndexedDbError::from_dom(e)))?;
        let params = web_sys::IdbIndexParameters::new();
        set_property(&params, "unique", &JsValue::from_bool(index.unique))?;
        store
            .create_index_with_str_and_optional_parameters(&index.name, &index.key_path, &params)
            .map_err(|e| StoreError::from(IndexedDbError::from_dom(e)))?;
        Ok(())
    }
}

/// Open `db_name` at the plan's version, running the plan in `onupgradeneeded`.
///
/// Returns the database and the upgrade decision, `None` when no upgrade ran. A
/// failing upgrade aborts the `versionchange` transaction, which fails the open.
pub async fn open_database(
    db_name: &str,
    plan: &UpgradePlan,
) -> Result<(IdbDatabase, Option<UpgradeAction>)> {
    let factory = idb_factory()?;

    let open_req: IdbOpenDbRequest = factory
        .open_with_u32(db_name, plan.version)
        .map_err(|e| IndexedDbError::Open(format!("{:?}", e)))?;

    let outcome: UpgradeOutcome = Rc::new(RefCell::new(None));

    // Store upgrade closure to manage its lifetime without leaking
    let upgrade_closure: UpgradeClosure = Rc::new(RefCell::new(None));
    let upgrade_closure_for_drop = upgrade_closure.clone();

    let plan_for_upgrade = plan.clone();
    let outcome_for_upgrade = outcome.clone();
    let on_upgrade = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        let old_version = event.old_version() as u32;
        let mut schema = match UpgradeSchema::from_event(&event) {
            Ok(schema) => schema,
            Err(err) => {
                *outcome_for_upgrade.borrow_mut() = Some(Err(err));
                return;
            }
        };

        let result = plan_for_upgrade.apply(old_version, &mut schema);
        if let Err(err) = &result {
            tracing::warn!(error = %err, "upgrade failed, aborting versionchange");
            let _ = schema.tx.abort();
        }
        *outcome_for_upgrade.borrow_mut() = Some(result);
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);

    open_req.set_onupgradeneeded(Some(on_upgrade.as_ref().unchecked_ref()));
    *upgrade_closure.borrow_mut() = Some(on_upgrade);

    let open_promise = request_to_promise(open_req.unchecked_ref());
    let opened = wasm_bindgen_futures::JsFuture::from(open_promise).await;

    // Clean up upgrade closure now that open is complete
    *upgrade_closure_for_drop.borrow_mut() = None;

    // An upgrade failure aborts the open; report the cause rather than the abort
    let upgrade = outcome
        .borrow_mut()
        .take()
        .transpose()
        .map_err(|err| IndexedDbError::Open(err.to_string()))?;
    let result = opened.map_err(|e| match IndexedDbError::from_dom(e) {
        IndexedDbError::Version(msg) => IndexedDbError::Version(msg),
        other => IndexedDbError::Open(other.to_string()),
    })?;

    Ok((into_database(result)?, upgrade))
}

fn into_database(result: JsValue) -> Result<IdbDatabase> {
    result
        .dyn_into::<IdbDatabase>()
        .map_err(|_| IndexedDbError::Open("result is not IdbDatabase".into()))
}

/// Start a transaction on a single object store.
pub fn begin_transaction(
    db: &IdbDatabase,
    store_name: &str,
    mode: IdbTransactionMode,
) -> Result<IdbTransaction> {
    db.transaction_with_str_and_mode(store_name, mode)
        .map_err(IndexedDbError::from_dom)
}

/// Await an IdbRequest, resolving to its result JsValue.
pub async fn await_request(req: &IdbRequest) -> Result<JsValue> {
    let promise = request_to_promise(req);
    wasm_bindgen_futures::JsFuture::from(promise)
        .await
        .map_err(IndexedDbError::from_dom)
}

/// Await a promise made by [`transaction_to_promise`].
pub async fn await_transaction(completion: &Promise) -> Result<()> {
    wasm_bindgen_futures::JsFuture::from(completion.clone())
        .await
        .map_err(|e| IndexedDbError::Transaction(IndexedDbError::from_dom(e).to_string()))?;
    Ok(())
}

/// Close `db` when another context opens a newer version or deletes it.
///
/// The returned closure must outlive the handler registration; drop it only
/// after clearing `onversionchange`.
pub fn close_on_version_change(db: &IdbDatabase, db_name: &str) -> VersionChangeClosure {
    let db_for_event = db.clone();
    let name = db_name.to_string();
    let on_version_change = Closure::wrap(Box::new(move |event: IdbVersionChangeEvent| {
        tracing::info!(
            database = %name,
            old_version = event.old_version(),
            new_version = ?event.new_version(),
            "versionchange requested elsewhere, closing connection"
        );
        db_for_event.close();
    }) as Box<dyn FnMut(IdbVersionChangeEvent)>);
    db.set_onversionchange(Some(on_version_change.as_ref().unchecked_ref()));
    on_version_change
}

/// Rejection value used when a delete is blocked by an open connection.
const DELETE_BLOCKED: &str = "blocked by an open connection";

/// Convert a `deleteDatabase` request into a JS Promise.
///
/// Unlike [`request_to_promise`] this also rejects on `blocked`; all handlers
/// are detached before their closures are dropped, since a blocked delete can
/// still succeed later.
fn delete_request_to_promise(req: &IdbOpenDbRequest) -> Promise {
    let req = req.clone();

    Promise::new(&mut move |resolve, reject| {
        let closures: Rc<RefCell<Option<(EventClosure, EventClosure, EventClosure)>>> =
            Rc::new(RefCell::new(None));

        let detach = {
            let req = req.clone();
            let closures = closures.clone();
            move || {
                req.set_onsuccess(None);
                req.set_onerror(None);
                req.set_onblocked(None);
                *closures.borrow_mut() = None;
            }
        };

        let detach_success = detach.clone();
        let on_success = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = resolve.call0(&JsValue::UNDEFINED);
            detach_success();
        }) as Box<dyn FnMut(web_sys::Event)>);

        let req_e = req.clone();
        let reject_error = reject.clone();
        let detach_error = detach.clone();
        let on_error = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let error = match req_e.error() {
                Ok(Some(ex)) => JsValue::from(ex),
                _ => JsValue::from_str("unknown IDB error"),
            };
            let _ = reject_error.call1(&JsValue::UNDEFINED, &error);
            detach_error();
        }) as Box<dyn FnMut(web_sys::Event)>);

        let on_blocked = Closure::wrap(Box::new(move |_event: web_sys::Event| {
            let _ = reject.call1(&JsValue::UNDEFINED, &JsValue::from_str(DELETE_BLOCKED));
            detach();
        }) as Box<dyn FnMut(web_sys::Event)>);

        req.set_onsuccess(Some(on_success.as_ref().unchecked_ref()));
        req.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        req.set_onblocked(Some(on_blocked.as_ref().unchecked_ref()));

        *closures.borrow_mut() = Some((on_success, on_error, on_blocked));
    })
}

/// Delete an IndexedDB database by name.
///
/// Fails with [`IndexedDbError::Blocked`] instead of waiting when another
/// connection keeps the database open.
pub async fn delete_database(db_name: &str) -> Result<()> {
    let factory = idb_factory()?;
    let req = factory
        .delete_database(db_name)
        .map_err(|e| IndexedDbError::Open(format!("delete db: {:?}", e)))?;
    wasm_bindgen_futures::JsFuture::from(delete_request_to_promise(&req))
        .await
        .map_err(|e| {
            if e.as_string().as_deref() == Some(DELETE_BLOCKED) {
                IndexedDbError::Blocked(format!("delete {}: {}", db_name, DELETE_BLOCKED))
            } else {
                IndexedDbError::Open(format!("delete db: {}", IndexedDbError::from_dom(e)))
            }
        })?;
    Ok(())
}
