//! Resolution of external resources while libxml2 parses.
//!
//! libxml2 looks up DTDs, included grammars and external entities through
//! process-wide hooks. This module installs two of them once:
//!
//! - an input handler for `cp:` URIs, answered from the [`ResourceLocator`],
//!   which also serves RELAX NG compact syntax grammars translated to the
//!   XML syntax
//! - an external entity loader that consults per-call XML catalogs, refuses
//!   network URIs and records every load that failed
//!
//! What the hooks do on a given thread is decided by the [`ResolutionScope`]
//! active on that thread. Without a scope both hooks step aside and libxml2
//! behaves as it does out of the box.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fs::File;
use std::io::{Cursor, Read};
use std::marker::PhantomData;
use std::path::PathBuf;
use std::ptr;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};

use libc::{c_char, c_int, c_void};
use tracing::{debug, trace};

use crate::compact;
use crate::error::{CompactSyntaxError, LibXml2Error, LibXml2Result, ValidationError};
use crate::libxml2::{
    LibXml2Wrapper, XmlCatalogPtr, XmlExternalEntityLoader, XmlParserCtxt, XmlParserInput,
    string_from_ptr, xmlGetExternalEntityLoader, xmlRegisterInputCallbacks,
    xmlSetExternalEntityLoader,
};
use crate::resource::ResourceLocator;

/// Whether a scope lets libxml2 load anything from outside the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalAccess {
    /// Every external load fails.
    Disabled,
    /// Bundled resources, catalog targets and local files load; network URIs do not.
    Enabled,
}

struct ScopeState {
    locator: Option<Arc<ResourceLocator>>,
    catalogs: Rc<[XmlCatalogPtr]>,
    access: ExternalAccess,
    failed_loads: Vec<String>,
    syntax_errors: Vec<String>,
}

thread_local! {
    static ACTIVE_SCOPE: RefCell<Option<ScopeState>> = const { RefCell::new(None) };
}

/// libxml2's own entity loader, captured when the hooks are installed.
static HOOKS: OnceLock<LibXml2Result<XmlExternalEntityLoader>> = OnceLock::new();

/// Register the `cp:` input handler and the scoped entity loader.
///
/// Runs once per process; later calls report the outcome of the first.
pub fn install_hooks() -> LibXml2Result<()> {
    let installed = HOOKS.get_or_init(|| {
        // Default input handlers must be registered before ours.
        let _ = LibXml2Wrapper::new();
        unsafe {
            let slot = xmlRegisterInputCallbacks(
                Some(resource_match),
                Some(resource_open),
                Some(resource_read),
                Some(resource_close),
            );
            if slot < 0 {
                return Err(LibXml2Error::CallbackRegistration);
            }
            let default_loader = xmlGetExternalEntityLoader();
            xmlSetExternalEntityLoader(Some(scoped_entity_loader));
            Ok(default_loader)
        }
    });
    installed.as_ref().map(|_| ()).map_err(Clone::clone)
}

fn default_loader() -> XmlExternalEntityLoader {
    HOOKS
        .get()
        .and_then(|installed| installed.as_ref().ok().copied())
        .flatten()
}

/// Resolution policy of the current thread for the lifetime of the value.
///
/// Scopes nest: dropping one restores whatever was active before it.
pub struct ResolutionScope {
    previous: Option<ScopeState>,
    _thread_bound: PhantomData<*const ()>,
}

impl ResolutionScope {
    /// A scope in which every external load fails.
    pub fn isolated() -> LibXml2Result<Self> {
        Self::enter(ScopeState {
            locator: None,
            catalogs: Rc::from(Vec::new()),
            access: ExternalAccess::Disabled,
            failed_loads: Vec::new(),
            syntax_errors: Vec::new(),
        })
    }

    /// A scope that serves `cp:` URIs from `locator` and rewrites identifiers
    /// through `catalogs`, first match wins.
    pub fn resolving(
        locator: Arc<ResourceLocator>,
        catalogs: Vec<XmlCatalogPtr>,
    ) -> LibXml2Result<Self> {
        Self::enter(ScopeState {
            locator: Some(locator),
            catalogs: Rc::from(catalogs),
            access: ExternalAccess::Enabled,
            failed_loads: Vec::new(),
            syntax_errors: Vec::new(),
        })
    }

    fn enter(state: ScopeState) -> LibXml2Result<Self> {
        install_hooks()?;
        let previous = ACTIVE_SCOPE.with(|scope| scope.replace(Some(state)));
        Ok(Self {
            previous,
            _thread_bound: PhantomData,
        })
    }

    /// URIs libxml2 asked for that could not be loaded, in request order.
    pub fn failed_loads(&self) -> Vec<String> {
        self.read_state(|state| state.failed_loads.clone())
    }

    /// Compact syntax grammars that were found but could not be translated,
    /// as `uri: line N: message`.
    pub fn syntax_errors(&self) -> Vec<String> {
        self.read_state(|state| state.syntax_errors.clone())
    }

    fn read_state(&self, read: impl FnOnce(&ScopeState) -> Vec<String>) -> Vec<String> {
        ACTIVE_SCOPE.with(|scope| scope.borrow().as_ref().map(read).unwrap_or_default())
    }
}

impl Drop for ResolutionScope {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = ACTIVE_SCOPE.try_with(|scope| {
            if let Ok(mut slot) = scope.try_borrow_mut() {
                *slot = previous;
            }
        });
    }
}

/// External access policy active on this thread, if any scope is.
pub fn active_access() -> Option<ExternalAccess> {
    ACTIVE_SCOPE
        .try_with(|scope| {
            scope
                .try_borrow()
                .ok()
                .and_then(|state| state.as_ref().map(|state| state.access))
        })
        .ok()
        .flatten()
}

/// Load each catalog reference as a bundled resource, in order.
///
/// References are plain resource names; the `cp:` prefix is not honored here.
pub fn load_catalogs(
    locator: &ResourceLocator,
    references: &[String],
) -> Result<Vec<XmlCatalogPtr>, ValidationError> {
    references
        .iter()
        .map(|reference| {
            let path =
                locator
                    .locate(reference)
                    .map_err(|err| ValidationError::CatalogResolution {
                        catalog: reference.clone(),
                        reason: err.to_string(),
                    })?;
            debug!(catalog = %reference, path = %path.display(), "loading XML catalog");
            XmlCatalogPtr::load(&path)?.ok_or_else(|| ValidationError::CatalogResolution {
                catalog: reference.clone(),
                reason: format!("{} is not a loadable catalog", path.display()),
            })
        })
        .collect()
}

fn is_network_uri(uri: &str) -> bool {
    let lower = uri.to_ascii_lowercase();
    ["http://", "https://", "ftp://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

fn active_locator() -> Option<Arc<ResourceLocator>> {
    ACTIVE_SCOPE
        .try_with(|scope| {
            scope
                .try_borrow()
                .ok()
                .and_then(|state| state.as_ref().and_then(|state| state.locator.clone()))
        })
        .ok()
        .flatten()
}

fn update_state(update: impl FnOnce(&mut ScopeState)) {
    let _ = ACTIVE_SCOPE.try_with(|scope| {
        if let Ok(mut slot) = scope.try_borrow_mut() {
            if let Some(state) = slot.as_mut() {
                update(state);
            }
        }
    });
}

fn record_failed_load(uri: String) {
    debug!(uri = %uri, "external resource could not be loaded");
    update_state(|state| state.failed_loads.push(uri));
}

fn record_syntax_error(uri: &str, error: CompactSyntaxError) {
    debug!(uri = %uri, error = %error, "compact syntax grammar could not be translated");
    update_state(|state| state.syntax_errors.push(format!("{}: {}", uri, error)));
}

enum LoadDecision {
    Passthrough,
    Deny,
    Resolve(Rc<[XmlCatalogPtr]>),
}

fn load_decision() -> LoadDecision {
    ACTIVE_SCOPE
        .try_with(|scope| match scope.try_borrow() {
            Ok(state) => match state.as_ref() {
                None => LoadDecision::Passthrough,
                Some(state) if state.access == ExternalAccess::Disabled => LoadDecision::Deny,
                Some(state) => LoadDecision::Resolve(Rc::clone(&state.catalogs)),
            },
            Err(_) => LoadDecision::Deny,
        })
        .unwrap_or(LoadDecision::Passthrough)
}

unsafe extern "C" fn scoped_entity_loader(
    url: *const c_char,
    id: *const c_char,
    context: *mut XmlParserCtxt,
) -> *mut XmlParserInput {
    let Some(loader) = default_loader() else {
        return ptr::null_mut();
    };
    let requested = unsafe { string_from_ptr(url) };

    let catalogs = match load_decision() {
        LoadDecision::Passthrough => return unsafe { loader(url, id, context) },
        LoadDecision::Deny => {
            record_failed_load(requested.unwrap_or_default());
            return ptr::null_mut();
        }
        LoadDecision::Resolve(catalogs) => catalogs,
    };

    let public_id = (!id.is_null()).then(|| unsafe { CStr::from_ptr(id) });
    let system_id = (!url.is_null()).then(|| unsafe { CStr::from_ptr(url) });
    let rewritten = catalogs
        .iter()
        .find_map(|catalog| catalog.resolve(public_id, system_id));
    if let Some(target) = &rewritten {
        trace!(requested = ?requested, target = %target, "catalog rewrote identifier");
    }

    let Some(target) = rewritten.or_else(|| requested.clone()) else {
        record_failed_load(String::new());
        return ptr::null_mut();
    };
    if is_network_uri(&target) {
        record_failed_load(requested.unwrap_or(target));
        return ptr::null_mut();
    }
    let Ok(target_c) = CString::new(target.as_str()) else {
        record_failed_load(requested.unwrap_or(target));
        return ptr::null_mut();
    };

    let input = unsafe { loader(target_c.as_ptr(), id, context) };
    if input.is_null() {
        record_failed_load(requested.unwrap_or(target));
    }
    input
}

/// Whether the input handler answers for `uri` on this thread.
///
/// `cp:` URIs are served while a resolving scope is active. Compact syntax
/// grammars on the local file system are served too, translated.
fn serves(uri: &str) -> bool {
    if ResourceLocator::is_resource_uri(uri) {
        return active_locator().is_some();
    }
    compact::is_compact_syntax(uri)
        && !is_network_uri(uri)
        && active_access() == Some(ExternalAccess::Enabled)
}

fn local_path(uri: &str) -> PathBuf {
    PathBuf::from(uri.strip_prefix("file://").unwrap_or(uri))
}

type ResourceReader = Box<dyn Read>;

fn open_resource(uri: &str) -> Option<ResourceReader> {
    let path = if ResourceLocator::is_resource_uri(uri) {
        let locator = active_locator()?;
        match locator.resolve(uri) {
            Ok(path) => path,
            Err(err) => {
                debug!(uri = %uri, error = %err, "bundled resource lookup failed");
                return None;
            }
        }
    } else {
        local_path(uri)
    };

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "resource could not be opened");
            return None;
        }
    };
    if !compact::is_compact_syntax(uri) {
        return Some(Box::new(file));
    }

    let mut source = String::new();
    if let Err(err) = file.read_to_string(&mut source) {
        debug!(path = %path.display(), error = %err, "compact syntax grammar could not be read");
        return None;
    }
    match compact::translate(&source) {
        Ok(xml) => {
            trace!(uri = %uri, "serving compact syntax grammar as XML");
            Some(Box::new(Cursor::new(xml.into_bytes())))
        }
        Err(err) => {
            record_syntax_error(uri, err);
            None
        }
    }
}

unsafe extern "C" fn resource_match(filename: *const c_char) -> c_int {
    let Some(uri) = (unsafe { string_from_ptr(filename) }) else {
        return 0;
    };
    c_int::from(serves(&uri))
}

unsafe extern "C" fn resource_open(filename: *const c_char) -> *mut c_void {
    let Some(uri) = (unsafe { string_from_ptr(filename) }) else {
        return ptr::null_mut();
    };
    match open_resource(&uri) {
        Some(reader) => Box::into_raw(Box::new(reader)) as *mut c_void,
        None => ptr::null_mut(),
    }
}

unsafe extern "C" fn resource_read(context: *mut c_void, buffer: *mut c_char, len: c_int) -> c_int {
    let Ok(len) = usize::try_from(len) else {
        return -1;
    };
    if context.is_null() || buffer.is_null() {
        return -1;
    }
    let reader = unsafe { &mut *(context as *mut ResourceReader) };
    let buffer = unsafe { std::slice::from_raw_parts_mut(buffer as *mut u8, len) };
    match reader.read(buffer) {
        Ok(read) => c_int::try_from(read).unwrap_or(-1),
        Err(_) => -1,
    }
}

unsafe extern "C" fn resource_close(context: *mut c_void) -> c_int {
    if !context.is_null() {
        drop(unsafe { Box::from_raw(context as *mut ResourceReader) });
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticCollector;
    use crate::libxml2::{DiagnosticSink, XML_PARSE_NOENT, XML_PARSE_NONET};
    use std::fs;
    use tempfile::TempDir;

    fn locator_with(files: &[(&str, &str)]) -> (TempDir, Arc<ResourceLocator>) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
        let locator = Arc::new(ResourceLocator::new([dir.path()]));
        (dir, locator)
    }

    #[test]
    fn test_scopes_nest_and_restore() {
        assert_eq!(active_access(), None);
        {
            let (_dir, locator) = locator_with(&[]);
            let _outer = ResolutionScope::resolving(locator, Vec::new()).unwrap();
            assert_eq!(active_access(), Some(ExternalAccess::Enabled));
            {
                let _inner = ResolutionScope::isolated().unwrap();
                assert_eq!(active_access(), Some(ExternalAccess::Disabled));
            }
            assert_eq!(active_access(), Some(ExternalAccess::Enabled));
        }
        assert_eq!(active_access(), None);
    }

    #[test]
    fn test_network_uri_detection() {
        assert!(is_network_uri("http://example.org/book.rng"));
        assert!(is_network_uri("HTTPS://example.org/book.rng"));
        assert!(is_network_uri("ftp://example.org/book.rng"));
        assert!(!is_network_uri("cp:/grammars/book.rng"));
        assert!(!is_network_uri("/tmp/book.rng"));
    }

    #[test]
    fn test_reads_bundled_resource_through_libxml2() {
        let (_dir, locator) = locator_with(&[("grammars/a.xml", "<a><b/></a>")]);
        let wrapper = LibXml2Wrapper::new();
        let _scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();

        let doc = wrapper
            .read_uri("cp:/grammars/a.xml", XML_PARSE_NONET)
            .unwrap()
            .expect("bundled resource should load");
        assert_eq!(doc.root_element().unwrap().local_name, "a");
    }

    #[test]
    fn test_missing_bundled_resource_is_recorded() {
        let (_dir, locator) = locator_with(&[]);
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();

        let mut collector = DiagnosticCollector::new();
        let doc = {
            let _sink = DiagnosticSink::install(&mut collector);
            wrapper.read_uri("cp:/grammars/none.xml", XML_PARSE_NONET).unwrap()
        };

        assert!(doc.is_none());
        assert!(
            scope
                .failed_loads()
                .iter()
                .any(|uri| uri == "cp:/grammars/none.xml")
        );
    }

    #[test]
    fn test_isolated_scope_refuses_external_entities() {
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::isolated().unwrap();
        let xml = br#"<!DOCTYPE a [<!ENTITY e SYSTEM "secret.txt">]><a>&e;</a>"#;

        let mut collector = DiagnosticCollector::new();
        {
            let _sink = DiagnosticSink::install(&mut collector);
            let _ = wrapper.parse_memory(xml, XML_PARSE_NOENT | XML_PARSE_NONET).unwrap();
        }

        assert!(
            scope
                .failed_loads()
                .iter()
                .any(|uri| uri.ends_with("secret.txt"))
        );
    }

    #[test]
    fn test_catalog_rewrites_identifier() {
        let catalog = r#"<catalog xmlns="urn:oasis:names:tc:entity:xmlns:xml:catalog">
  <uri name="http://example.org/shared/a.xml" uri="local/a.xml"/>
</catalog>"#;
        let (_dir, locator) = locator_with(&[
            ("catalogs/catalog.xml", catalog),
            ("catalogs/local/a.xml", "<a/>"),
        ]);
        let catalogs =
            load_catalogs(&locator, &["catalogs/catalog.xml".to_string()]).unwrap();
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::resolving(locator, catalogs).unwrap();

        let doc = wrapper
            .read_uri("http://example.org/shared/a.xml", XML_PARSE_NONET)
            .unwrap();

        assert!(doc.is_some(), "failed loads: {:?}", scope.failed_loads());
    }

    #[test]
    fn test_network_uri_without_catalog_entry_fails() {
        let (_dir, locator) = locator_with(&[]);
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();

        let mut collector = DiagnosticCollector::new();
        let doc = {
            let _sink = DiagnosticSink::install(&mut collector);
            wrapper
                .read_uri("http://example.org/shared/a.xml", XML_PARSE_NONET)
                .unwrap()
        };

        assert!(doc.is_none());
        assert!(
            scope
                .failed_loads()
                .iter()
                .any(|uri| uri == "http://example.org/shared/a.xml")
        );
    }

    #[test]
    fn test_load_catalogs_reports_missing_reference() {
        let (_dir, locator) = locator_with(&[]);

        let err = load_catalogs(&locator, &["catalogs/none.xml".to_string()]).unwrap_err();
        match err {
            ValidationError::CatalogResolution { catalog, .. } => {
                assert_eq!(catalog, "catalogs/none.xml");
            }
            other => panic!("Expected CatalogResolution, got {:?}", other),
        }
    }

    #[test]
    fn test_load_catalogs_ignores_resource_scheme() {
        let (_dir, locator) = locator_with(&[("catalogs/catalog.xml", "<catalog/>")]);

        let err = load_catalogs(&locator, &["cp:/catalogs/catalog.xml".to_string()]);
        assert!(matches!(err, Err(ValidationError::CatalogResolution { .. })));
    }

    #[test]
    fn test_compact_syntax_is_served_as_xml() {
        let (_dir, locator) = locator_with(&[(
            "grammars/book.rnc",
            "element book { element title { text } }",
        )]);
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();

        let doc = wrapper
            .read_uri("cp:/grammars/book.rnc", XML_PARSE_NONET)
            .unwrap()
            .expect("compact grammar should be translated");

        let root = doc.root_element().unwrap();
        assert_eq!(root.local_name, "grammar");
        assert_eq!(
            root.namespace.as_deref(),
            Some("http://relaxng.org/ns/structure/1.0")
        );
        assert!(scope.syntax_errors().is_empty());
    }

    #[test]
    fn test_local_compact_syntax_is_served_as_xml() {
        let (dir, locator) = locator_with(&[("book.rnc", "element book { empty }")]);
        let wrapper = LibXml2Wrapper::new();
        let _scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();
        let path = dir.path().join("book.rnc");

        let doc = wrapper
            .read_uri(&path.to_string_lossy(), XML_PARSE_NONET)
            .unwrap()
            .expect("compact grammar should be translated");
        assert_eq!(doc.root_element().unwrap().local_name, "grammar");
    }

    #[test]
    fn test_compact_syntax_errors_are_recorded() {
        let (_dir, locator) = locator_with(&[("grammars/bad.rnc", "element book {\n  text")]);
        let wrapper = LibXml2Wrapper::new();
        let scope = ResolutionScope::resolving(locator, Vec::new()).unwrap();

        let mut collector = DiagnosticCollector::new();
        let doc = {
            let _sink = DiagnosticSink::install(&mut collector);
            wrapper.read_uri("cp:/grammars/bad.rnc", XML_PARSE_NONET).unwrap()
        };

        assert!(doc.is_none());
        let errors = scope.syntax_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("cp:/grammars/bad.rnc: line 2:"), "{:?}", errors);
    }
}
