//! LibXML2 FFI Wrapper Module
//!
//! Direct bindings to the parts of libxml2 this crate needs: document parsing
//! and serialization, DTD validation, the three grammar engines (W3C XML Schema,
//! RELAX NG, ISO Schematron), XML catalogs and the I/O hooks used for bundled
//! resources.
//!
//! Every libxml2 object handed out by this module is owned by an RAII wrapper
//! that frees it exactly once. Raw pointers never leave the crate.
//!
//! ## Thread Safety
//!
//! libxml2 keeps its structured error handler and external entity loader
//! state per thread when built with thread support (the default for every
//! distribution package). Parsing and validating *different* documents on
//! different threads is safe once [`LibXml2Wrapper::new`] has run the one-time
//! initialization. None of the wrappers here are `Send`: a document or compiled
//! schema stays on the thread that created it.

use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;
use std::ptr;
use std::sync::Once;

use libc::{c_char, c_int, c_long, c_uchar, c_void};

use crate::diagnostics::{Diagnostic, DiagnosticCollector, Severity};
use crate::error::{LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are NOT thread-safe, so they run under
/// `std::sync::Once` before any other call into the library.
static LIBXML2_INIT: Once = Once::new();

// xmlParserOption values
pub const XML_PARSE_NOENT: c_int = 1 << 1;
pub const XML_PARSE_DTDLOAD: c_int = 1 << 2;
pub const XML_PARSE_NONET: c_int = 1 << 11;

// xmlSchematronValidOptions: report failed assertions through the error channel
const XML_SCHEMATRON_OUT_ERROR: c_int = 1 << 3;

// xmlElementType
const XML_ELEMENT_NODE: c_int = 1;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDtd {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlRelaxNG {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlRelaxNGParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlRelaxNGValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchematron {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchematronParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchematronValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlCatalog {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlParserInput {
    _private: [u8; 0],
}

/// Leading fields of `xmlNode`, stable across libxml2 releases.
#[repr(C)]
#[allow(dead_code)]
pub struct XmlNode {
    _private: *mut c_void,
    node_type: c_int,
    name: *const c_uchar,
    children: *mut XmlNode,
    last: *mut XmlNode,
    parent: *mut XmlNode,
    next: *mut XmlNode,
    prev: *mut XmlNode,
    doc: *mut XmlDoc,
    ns: *mut XmlNs,
}

/// Leading fields of `xmlNs`.
#[repr(C)]
#[allow(dead_code)]
pub struct XmlNs {
    next: *mut XmlNs,
    ns_type: c_int,
    href: *const c_uchar,
    prefix: *const c_uchar,
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *mut xmlError)>;

pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(
        url: *const c_char,
        id: *const c_char,
        context: *mut XmlParserCtxt,
    ) -> *mut XmlParserInput,
>;

pub type XmlInputMatchCallback = Option<unsafe extern "C" fn(filename: *const c_char) -> c_int>;
pub type XmlInputOpenCallback =
    Option<unsafe extern "C" fn(filename: *const c_char) -> *mut c_void>;
pub type XmlInputReadCallback =
    Option<unsafe extern "C" fn(context: *mut c_void, buffer: *mut c_char, len: c_int) -> c_int>;
pub type XmlInputCloseCallback = Option<unsafe extern "C" fn(context: *mut c_void) -> c_int>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlRelaxNGInitTypes() -> c_int;
    pub fn xmlSchemaInitTypes();

    // Documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlReadFile(filename: *const c_char, encoding: *const c_char, options: c_int)
    -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlNewDoc(version: *const c_uchar) -> *mut XmlDoc;
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;
    pub fn xmlDocSetRootElement(doc: *mut XmlDoc, root: *mut XmlNode) -> *mut XmlNode;
    pub fn xmlDocDumpMemoryEnc(
        doc: *mut XmlDoc,
        mem: *mut *mut c_uchar,
        size: *mut c_int,
        encoding: *const c_char,
    );

    // Document type declarations
    pub fn xmlGetIntSubset(doc: *const XmlDoc) -> *mut XmlDtd;
    pub fn xmlCreateIntSubset(
        doc: *mut XmlDoc,
        name: *const c_uchar,
        external_id: *const c_uchar,
        system_id: *const c_uchar,
    ) -> *mut XmlDtd;
    pub fn xmlUnlinkNode(node: *mut XmlNode);
    pub fn xmlFreeDtd(dtd: *mut XmlDtd);

    // Tree access
    pub fn xmlDocCopyNode(node: *mut XmlNode, doc: *mut XmlDoc, extended: c_int) -> *mut XmlNode;
    pub fn xmlFreeNode(node: *mut XmlNode);
    pub fn xmlGetLineNo(node: *const XmlNode) -> c_long;
    pub fn xmlGetNoNsProp(node: *const XmlNode, name: *const c_uchar) -> *mut c_uchar;
    pub fn xmlSetProp(node: *mut XmlNode, name: *const c_uchar, value: *const c_uchar)
    -> *mut c_void;
    pub fn xmlNodeGetContent(node: *const XmlNode) -> *mut c_uchar;
    pub fn xmlBuildURI(uri: *const c_uchar, base: *const c_uchar) -> *mut c_uchar;

    // DTD validation
    pub fn xmlNewValidCtxt() -> *mut XmlValidCtxt;
    pub fn xmlFreeValidCtxt(ctxt: *mut XmlValidCtxt);
    pub fn xmlValidateDocument(ctxt: *mut XmlValidCtxt, doc: *mut XmlDoc) -> c_int;

    // W3C XML Schema
    pub fn xmlSchemaNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *mut XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);
    pub fn xmlSchemaNewValidCtxt(schema: *mut XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);

    // RELAX NG
    pub fn xmlRelaxNGNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlRelaxNGParserCtxt;
    pub fn xmlRelaxNGSetParserStructuredErrors(
        ctxt: *mut XmlRelaxNGParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlRelaxNGParse(ctxt: *mut XmlRelaxNGParserCtxt) -> *mut XmlRelaxNG;
    pub fn xmlRelaxNGFreeParserCtxt(ctxt: *mut XmlRelaxNGParserCtxt);
    pub fn xmlRelaxNGFree(schema: *mut XmlRelaxNG);
    pub fn xmlRelaxNGNewValidCtxt(schema: *mut XmlRelaxNG) -> *mut XmlRelaxNGValidCtxt;
    pub fn xmlRelaxNGSetValidStructuredErrors(
        ctxt: *mut XmlRelaxNGValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlRelaxNGValidateDoc(ctxt: *mut XmlRelaxNGValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlRelaxNGFreeValidCtxt(ctxt: *mut XmlRelaxNGValidCtxt);

    // ISO Schematron
    pub fn xmlSchematronNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchematronParserCtxt;
    pub fn xmlSchematronParse(ctxt: *mut XmlSchematronParserCtxt) -> *mut XmlSchematron;
    pub fn xmlSchematronFreeParserCtxt(ctxt: *mut XmlSchematronParserCtxt);
    pub fn xmlSchematronFree(schema: *mut XmlSchematron);
    pub fn xmlSchematronNewValidCtxt(
        schema: *mut XmlSchematron,
        options: c_int,
    ) -> *mut XmlSchematronValidCtxt;
    pub fn xmlSchematronSetValidStructuredErrors(
        ctxt: *mut XmlSchematronValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchematronValidateDoc(ctxt: *mut XmlSchematronValidCtxt, doc: *mut XmlDoc)
    -> c_int;
    pub fn xmlSchematronFreeValidCtxt(ctxt: *mut XmlSchematronValidCtxt);

    // Catalogs
    pub fn xmlLoadACatalog(filename: *const c_char) -> *mut XmlCatalog;
    pub fn xmlFreeCatalog(catal: *mut XmlCatalog);
    pub fn xmlACatalogResolve(
        catal: *mut XmlCatalog,
        public_id: *const c_uchar,
        system_id: *const c_uchar,
    ) -> *mut c_uchar;
    pub fn xmlACatalogResolveURI(catal: *mut XmlCatalog, uri: *const c_uchar) -> *mut c_uchar;

    // Error reporting and I/O hooks
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlSetExternalEntityLoader(loader: XmlExternalEntityLoader);
    pub fn xmlRegisterInputCallbacks(
        match_fn: XmlInputMatchCallback,
        open_fn: XmlInputOpenCallback,
        read_fn: XmlInputReadCallback,
        close_fn: XmlInputCloseCallback,
    ) -> c_int;
}

/// Copy a libxml2-owned C string, if present.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn string_from_ptr(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

/// Take ownership of a string allocated by libxml2 and release it.
///
/// # Safety
///
/// `ptr` must be null or a string allocated with libxml2's default allocator.
unsafe fn take_xml_string(ptr: *mut c_uchar) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { string_from_ptr(ptr as *const c_char) };
    unsafe { libc::free(ptr as *mut c_void) };
    value
}

pub(crate) fn c_string(value: &str) -> LibXml2Result<CString> {
    CString::new(value).map_err(|_| LibXml2Error::InvalidString {
        value: value.to_string(),
    })
}

fn buffer_len(data: &[u8]) -> LibXml2Result<c_int> {
    c_int::try_from(data.len()).map_err(|_| LibXml2Error::BufferTooLarge { size: data.len() })
}

/// Resolve `href` against `base` the way libxml2 resolves includes.
///
/// `None` when libxml2 cannot make sense of either reference.
pub fn build_uri(href: &str, base: &str) -> LibXml2Result<Option<String>> {
    let href = c_string(href)?;
    let base = c_string(base)?;
    Ok(unsafe {
        take_xml_string(xmlBuildURI(
            href.as_ptr() as *const c_uchar,
            base.as_ptr() as *const c_uchar,
        ))
    })
}

/// Callback for libxml2 to report parser and validation errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let collector = unsafe { &mut *(user_data as *mut DiagnosticCollector) };
    let error = unsafe { &*error };

    let Some(severity) = Severity::from_libxml2_level(error.level) else {
        return;
    };
    let message = unsafe { string_from_ptr(error.message) }
        .map(|message| message.trim().to_string())
        .unwrap_or_else(|| format!("libxml2 error {} (domain {})", error.code, error.domain));
    let file = unsafe { string_from_ptr(error.file) };
    let line = u32::try_from(error.line).ok().filter(|line| *line > 0);

    collector.record(Diagnostic::new(severity, message).with_location(file, line));
}

/// Routes libxml2 errors raised on this thread into a [`DiagnosticCollector`].
///
/// While the sink is alive the collector is mutably borrowed; dropping the
/// sink uninstalls the handler and hands the collector back.
pub struct DiagnosticSink<'a> {
    collector: *mut DiagnosticCollector,
    _collector: PhantomData<&'a mut DiagnosticCollector>,
}

impl<'a> DiagnosticSink<'a> {
    pub fn install(collector: &'a mut DiagnosticCollector) -> Self {
        let collector = collector as *mut DiagnosticCollector;
        unsafe {
            xmlSetStructuredErrorFunc(collector as *mut c_void, Some(structured_error_callback));
        }
        Self {
            collector,
            _collector: PhantomData,
        }
    }

    fn user_data(&self) -> *mut c_void {
        self.collector as *mut c_void
    }

    /// Record a diagnostic of our own next to the engine's.
    pub(crate) fn report(&self, diagnostic: Diagnostic) {
        self.amend(|collector| collector.record(diagnostic));
    }

    /// Edit what has been collected so far. Only called between libxml2
    /// calls, never from inside a callback.
    pub(crate) fn amend(&self, edit: impl FnOnce(&mut DiagnosticCollector)) {
        edit(unsafe { &mut *self.collector });
    }
}

impl Drop for DiagnosticSink<'_> {
    fn drop(&mut self) {
        unsafe { xmlSetStructuredErrorFunc(ptr::null_mut(), None) };
    }
}

/// Qualified name and namespace of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementName {
    pub local_name: String,
    pub prefix: Option<String>,
    pub namespace: Option<String>,
}

impl ElementName {
    pub fn qualified_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local_name),
            None => self.local_name.clone(),
        }
    }

    /// `{namespace}local`, or the bare local name outside any namespace.
    pub fn expanded_name(&self) -> String {
        match &self.namespace {
            Some(namespace) => format!("{{{}}}{}", namespace, self.local_name),
            None => self.local_name.clone(),
        }
    }
}

/// # Safety
///
/// `node` must point to a live element node.
unsafe fn element_name(node: *const XmlNode) -> ElementName {
    unsafe {
        let local_name = string_from_ptr((*node).name as *const c_char).unwrap_or_default();
        let ns = (*node).ns;
        let (prefix, namespace) = if ns.is_null() {
            (None, None)
        } else {
            (
                string_from_ptr((*ns).prefix as *const c_char),
                string_from_ptr((*ns).href as *const c_char),
            )
        };
        ElementName {
            local_name,
            prefix,
            namespace,
        }
    }
}

/// # Safety
///
/// `node` must point to a live element node.
unsafe fn namespace_href<'n>(node: *const XmlNode) -> Option<&'n CStr> {
    unsafe {
        let ns = (*node).ns;
        if ns.is_null() || (*ns).href.is_null() {
            None
        } else {
            Some(CStr::from_ptr((*ns).href as *const c_char))
        }
    }
}

/// # Safety
///
/// `node` must point to a live element node.
unsafe fn element_children(node: *const XmlNode) -> Vec<*mut XmlNode> {
    let mut children = Vec::new();
    unsafe {
        let mut child = (*node).children;
        while !child.is_null() {
            if (*child).node_type == XML_ELEMENT_NODE {
                children.push(child);
            }
            child = (*child).next;
        }
    }
    children
}

/// An element of a parsed document, borrowed from it.
#[derive(Clone, Copy)]
pub struct XmlElement<'a> {
    node: *mut XmlNode,
    _doc: PhantomData<&'a XmlDocPtr>,
}

impl<'a> XmlElement<'a> {
    /// # Safety
    ///
    /// `node` must be an element node of a document that outlives `'a`.
    unsafe fn new(node: *mut XmlNode) -> Self {
        Self {
            node,
            _doc: PhantomData,
        }
    }

    pub fn name(&self) -> ElementName {
        unsafe { element_name(self.node) }
    }

    pub fn is(&self, namespace: Option<&str>, local_name: &str) -> bool {
        let name = self.name();
        name.local_name == local_name && name.namespace.as_deref() == namespace
    }

    /// Source line of the start tag, when the parser recorded one.
    pub fn line(&self) -> Option<u32> {
        let line = unsafe { xmlGetLineNo(self.node) };
        u32::try_from(line).ok().filter(|line| *line > 0)
    }

    /// Value of an attribute without namespace.
    pub fn attribute(&self, name: &str) -> Option<String> {
        let name = c_string(name).ok()?;
        unsafe { take_xml_string(xmlGetNoNsProp(self.node, name.as_ptr() as *const c_uchar)) }
    }

    /// Concatenated text of all descendants.
    pub fn text(&self) -> String {
        unsafe { take_xml_string(xmlNodeGetContent(self.node)) }.unwrap_or_default()
    }

    pub fn children(&self) -> Vec<XmlElement<'a>> {
        unsafe { element_children(self.node) }
            .into_iter()
            .map(|child| unsafe { XmlElement::new(child) })
            .collect()
    }

    /// This element and every element below it, in document order.
    pub fn descendants(&self) -> Vec<XmlElement<'a>> {
        let mut found = Vec::new();
        let mut pending = vec![*self];
        while let Some(element) = pending.pop() {
            found.push(element);
            pending.extend(element.children().into_iter().rev());
        }
        found
    }

    /// Copy this element's subtree into a document of its own.
    ///
    /// Below the copied element, every child whose namespace differs from its
    /// parent's is offered to `detach`; the ones it accepts are left out
    /// together with their subtrees. Line numbers carry over to the copy.
    pub fn copy_as_document(
        &self,
        mut detach: impl FnMut(&ElementName) -> bool,
    ) -> LibXml2Result<XmlDocPtr> {
        unsafe {
            let doc = XmlDocPtr::from_raw(xmlNewDoc(c"1.0".as_ptr() as *const c_uchar))
                .ok_or(LibXml2Error::MemoryAllocation)?;
            let copy = xmlDocCopyNode(self.node, doc.as_ptr(), 1);
            if copy.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            xmlDocSetRootElement(doc.as_ptr(), copy);

            let mut detached = Vec::new();
            let mut pending = vec![copy];
            while let Some(node) = pending.pop() {
                let namespace = namespace_href(node);
                for child in element_children(node) {
                    if namespace_href(child) != namespace && detach(&element_name(child)) {
                        detached.push(child);
                    } else {
                        pending.push(child);
                    }
                }
            }
            for node in detached {
                xmlUnlinkNode(node);
                xmlFreeNode(node);
            }
            Ok(doc)
        }
    }
}

impl fmt::Debug for XmlElement<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlElement")
            .field("name", &self.name().expanded_name())
            .field("line", &self.line())
            .finish()
    }
}

/// Owned libxml2 document
pub struct XmlDocPtr {
    ptr: *mut XmlDoc,
    // Internal subset unlinked by `replace_doctype`.
    detached_dtd: *mut XmlDtd,
}

impl XmlDocPtr {
    /// # Safety
    ///
    /// `ptr` must be null or a document owned by nobody else.
    unsafe fn from_raw(ptr: *mut XmlDoc) -> Option<Self> {
        (!ptr.is_null()).then_some(Self {
            ptr,
            detached_dtd: ptr::null_mut(),
        })
    }

    pub(crate) fn as_ptr(&self) -> *mut XmlDoc {
        self.ptr
    }

    pub fn root(&self) -> Option<XmlElement<'_>> {
        unsafe {
            let root = xmlDocGetRootElement(self.ptr);
            (!root.is_null()).then(|| XmlElement::new(root))
        }
    }

    pub fn root_element(&self) -> Option<ElementName> {
        self.root().map(|root| root.name())
    }

    /// Number of `local_name` elements in `namespace` anywhere in the document.
    pub fn count_elements(&self, namespace: Option<&str>, local_name: &str) -> usize {
        self.root().map_or(0, |root| {
            root.descendants()
                .iter()
                .filter(|element| element.is(namespace, local_name))
                .count()
        })
    }

    /// Give every `local_name` element in `namespace` that carries neither an
    /// `id` nor a `name` attribute a generated `id` not used elsewhere in the
    /// document. Returns how many elements were named.
    pub fn assign_missing_ids(
        &mut self,
        namespace: Option<&str>,
        local_name: &str,
    ) -> LibXml2Result<usize> {
        let Some(root) = self.root() else {
            return Ok(0);
        };
        let elements = root.descendants();
        let mut taken: HashSet<String> = elements
            .iter()
            .filter_map(|element| element.attribute("id"))
            .collect();
        let anonymous: Vec<*mut XmlNode> = elements
            .iter()
            .filter(|element| {
                element.is(namespace, local_name)
                    && element.attribute("id").is_none()
                    && element.attribute("name").is_none()
            })
            .map(|element| element.node)
            .collect();

        let mut counter = 0usize;
        for node in &anonymous {
            let id = loop {
                counter += 1;
                let candidate = format!("{}-{}", local_name, counter);
                if taken.insert(candidate.clone()) {
                    break candidate;
                }
            };
            let id = c_string(&id)?;
            let attr = unsafe {
                xmlSetProp(
                    *node,
                    c"id".as_ptr() as *const c_uchar,
                    id.as_ptr() as *const c_uchar,
                )
            };
            if attr.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
        }
        Ok(anonymous.len())
    }

    /// Replace the document type declaration with `<!DOCTYPE root SYSTEM "system_id">`.
    pub fn replace_doctype(&mut self, system_id: &str) -> LibXml2Result<()> {
        let root = self.root_element().ok_or(LibXml2Error::MissingRoot)?;
        let name = c_string(&root.qualified_name())?;
        let system_id = c_string(system_id)?;

        unsafe {
            let existing = xmlGetIntSubset(self.ptr);
            if !existing.is_null() {
                xmlUnlinkNode(existing as *mut XmlNode);
                if !self.detached_dtd.is_null() {
                    xmlFreeDtd(self.detached_dtd);
                }
                self.detached_dtd = existing;
            }

            let dtd = xmlCreateIntSubset(
                self.ptr,
                name.as_ptr() as *const c_uchar,
                ptr::null(),
                system_id.as_ptr() as *const c_uchar,
            );
            if dtd.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
        }
        Ok(())
    }

    /// Serialize the whole document, XML declaration included, as UTF-8.
    pub fn to_utf8(&self) -> LibXml2Result<Vec<u8>> {
        let mut buffer: *mut c_uchar = ptr::null_mut();
        let mut size: c_int = 0;

        unsafe {
            xmlDocDumpMemoryEnc(self.ptr, &mut buffer, &mut size, c"UTF-8".as_ptr());
            if buffer.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            let len = usize::try_from(size).unwrap_or(0);
            let bytes = std::slice::from_raw_parts(buffer, len).to_vec();
            libc::free(buffer as *mut c_void);
            Ok(bytes)
        }
    }
}

impl fmt::Debug for XmlDocPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocPtr")
            .field("root", &self.root_element().map(|root| root.expanded_name()))
            .finish()
    }
}

impl Drop for XmlDocPtr {
    fn drop(&mut self) {
        unsafe {
            // xmlFreeDtd reads the dictionary of the owning document, so the
            // detached subset goes first.
            if !self.detached_dtd.is_null() {
                xmlFreeDtd(self.detached_dtd);
                self.detached_dtd = ptr::null_mut();
            }
            if !self.ptr.is_null() {
                xmlFreeDoc(self.ptr);
                self.ptr = ptr::null_mut();
            }
        }
    }
}

/// Owned libxml2 XML catalog
pub struct XmlCatalogPtr {
    ptr: *mut XmlCatalog,
}

impl XmlCatalogPtr {
    /// Load an XML or SGML catalog file. `None` when libxml2 rejects it.
    pub fn load(path: &Path) -> LibXml2Result<Option<Self>> {
        let path = c_string(&path.to_string_lossy())?;
        let ptr = unsafe { xmlLoadACatalog(path.as_ptr()) };
        Ok((!ptr.is_null()).then_some(Self { ptr }))
    }

    /// Map an external identifier or URI through this catalog.
    pub fn resolve(&self, public_id: Option<&CStr>, system_id: Option<&CStr>) -> Option<String> {
        let public = public_id.map_or(ptr::null(), |id| id.as_ptr() as *const c_uchar);
        let system = system_id.map_or(ptr::null(), |id| id.as_ptr() as *const c_uchar);

        unsafe {
            if let Some(found) = take_xml_string(xmlACatalogResolve(self.ptr, public, system)) {
                return Some(found);
            }
            if system.is_null() {
                return None;
            }
            take_xml_string(xmlACatalogResolveURI(self.ptr, system))
        }
    }
}

impl fmt::Debug for XmlCatalogPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlCatalogPtr").field("ptr", &self.ptr).finish()
    }
}

impl Drop for XmlCatalogPtr {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { xmlFreeCatalog(self.ptr) };
            self.ptr = ptr::null_mut();
        }
    }
}

/// The libxml2 engine that compiles and runs a grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarEngine {
    XmlSchema,
    RelaxNg,
    Schematron,
}

enum SchemaHandle {
    XmlSchema(*mut XmlSchema),
    RelaxNg(*mut XmlRelaxNG),
    Schematron(*mut XmlSchematron),
}

/// A compiled grammar together with the document it was compiled from.
///
/// Schematron keeps pointers into its source document, so the source lives
/// exactly as long as the compiled form.
pub struct CompiledSchema {
    handle: SchemaHandle,
    _source: XmlDocPtr,
}

impl CompiledSchema {
    pub fn engine(&self) -> GrammarEngine {
        match self.handle {
            SchemaHandle::XmlSchema(_) => GrammarEngine::XmlSchema,
            SchemaHandle::RelaxNg(_) => GrammarEngine::RelaxNg,
            SchemaHandle::Schematron(_) => GrammarEngine::Schematron,
        }
    }
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("engine", &self.engine())
            .finish()
    }
}

impl Drop for CompiledSchema {
    fn drop(&mut self) {
        unsafe {
            match self.handle {
                SchemaHandle::XmlSchema(schema) => xmlSchemaFree(schema),
                SchemaHandle::RelaxNg(schema) => xmlRelaxNGFree(schema),
                SchemaHandle::Schematron(schema) => xmlSchematronFree(schema),
            }
        }
    }
}

/// Validation result from libxml2
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded
    Valid,
    /// The document violates the grammar; the count is unknown for DTDs
    Invalid { error_count: Option<u32> },
    /// The engine gave up (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    /// Interpret the return code of the `xml*ValidateDoc` family.
    pub fn from_code(code: c_int) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: u32::try_from(n).ok(),
            },
            n => ValidationResult::InternalError { code: n },
        }
    }

    /// Interpret the status of `xmlValidateDocument` (1 valid, 0 invalid).
    pub fn from_dtd_status(status: c_int) -> Self {
        match status {
            1 => ValidationResult::Valid,
            0 => ValidationResult::Invalid { error_count: None },
            n => ValidationResult::InternalError { code: n },
        }
    }

    /// Check if validation was successful
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    /// Check if validation failed due to grammar violations
    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    /// Check if an internal error occurred
    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// Safe access to the libxml2 operations used by the validator
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a new LibXML2 wrapper instance
    ///
    /// It's safe to call this multiple times - initialization happens exactly once.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            // Both type libraries are otherwise built lazily on first use,
            // which races when the first validations run in parallel.
            xmlRelaxNGInitTypes();
            xmlSchemaInitTypes();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a document from memory. `Ok(None)` when it is not well-formed;
    /// the reasons went to the active [`DiagnosticSink`].
    pub fn parse_memory(&self, data: &[u8], options: c_int) -> LibXml2Result<Option<XmlDocPtr>> {
        let len = buffer_len(data)?;
        unsafe {
            let doc = xmlReadMemory(
                data.as_ptr() as *const c_char,
                len,
                ptr::null(),
                ptr::null(),
                options,
            );
            Ok(XmlDocPtr::from_raw(doc))
        }
    }

    /// Load and parse a document by URI through libxml2's I/O layer, so that
    /// registered input handlers and the entity loader apply.
    pub fn read_uri(&self, uri: &str, options: c_int) -> LibXml2Result<Option<XmlDocPtr>> {
        let uri = c_string(uri)?;
        unsafe {
            let doc = xmlReadFile(uri.as_ptr(), ptr::null(), options);
            Ok(XmlDocPtr::from_raw(doc))
        }
    }

    /// Validate a document against the DTD referenced by its doctype.
    pub fn validate_dtd(&self, doc: &XmlDocPtr) -> LibXml2Result<ValidationResult> {
        unsafe {
            let ctxt = xmlNewValidCtxt();
            if ctxt.is_null() {
                return Err(LibXml2Error::ContextCreationFailed {
                    context: "DTD validation context",
                });
            }
            let status = xmlValidateDocument(ctxt, doc.as_ptr());
            xmlFreeValidCtxt(ctxt);
            Ok(ValidationResult::from_dtd_status(status))
        }
    }

    /// Compile a grammar from its parsed source document.
    ///
    /// `Ok(None)` means the engine rejected the grammar; its reasons went to
    /// `sink`. Included or imported grammars are loaded relative to the
    /// source document's URL.
    pub fn compile_schema(
        &self,
        engine: GrammarEngine,
        mut source: XmlDocPtr,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<Option<CompiledSchema>> {
        if engine == GrammarEngine::Schematron && !prepare_schematron(&mut source, sink)? {
            return Ok(None);
        }

        let handle = unsafe {
            match engine {
                GrammarEngine::XmlSchema => {
                    let ctxt = xmlSchemaNewDocParserCtxt(source.as_ptr());
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "XML Schema parser context",
                        });
                    }
                    xmlSchemaSetParserStructuredErrors(
                        ctxt,
                        Some(structured_error_callback),
                        sink.user_data(),
                    );
                    let schema = xmlSchemaParse(ctxt);
                    xmlSchemaFreeParserCtxt(ctxt);
                    (!schema.is_null()).then_some(SchemaHandle::XmlSchema(schema))
                }
                GrammarEngine::RelaxNg => {
                    let ctxt = xmlRelaxNGNewDocParserCtxt(source.as_ptr());
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "RELAX NG parser context",
                        });
                    }
                    xmlRelaxNGSetParserStructuredErrors(
                        ctxt,
                        Some(structured_error_callback),
                        sink.user_data(),
                    );
                    let schema = xmlRelaxNGParse(ctxt);
                    xmlRelaxNGFreeParserCtxt(ctxt);
                    (!schema.is_null()).then_some(SchemaHandle::RelaxNg(schema))
                }
                GrammarEngine::Schematron => {
                    // Schematron parser errors go through the thread's
                    // structured handler installed by `sink`.
                    let ctxt = xmlSchematronNewDocParserCtxt(source.as_ptr());
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "Schematron parser context",
                        });
                    }
                    let schema = xmlSchematronParse(ctxt);
                    xmlSchematronFreeParserCtxt(ctxt);
                    (!schema.is_null()).then_some(SchemaHandle::Schematron(schema))
                }
            }
        };

        Ok(handle.map(|handle| CompiledSchema {
            handle,
            _source: source,
        }))
    }

    /// Validate a parsed document against a compiled grammar.
    ///
    /// Every violation is reported to `sink`; validation does not stop at the
    /// first one.
    pub fn validate_doc(
        &self,
        schema: &CompiledSchema,
        doc: &XmlDocPtr,
        sink: &DiagnosticSink<'_>,
    ) -> LibXml2Result<ValidationResult> {
        let code = unsafe {
            match schema.handle {
                SchemaHandle::XmlSchema(grammar) => {
                    let ctxt = xmlSchemaNewValidCtxt(grammar);
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "XML Schema validation context",
                        });
                    }
                    xmlSchemaSetValidStructuredErrors(
                        ctxt,
                        Some(structured_error_callback),
                        sink.user_data(),
                    );
                    let code = xmlSchemaValidateDoc(ctxt, doc.as_ptr());
                    xmlSchemaFreeValidCtxt(ctxt);
                    code
                }
                SchemaHandle::RelaxNg(grammar) => {
                    let ctxt = xmlRelaxNGNewValidCtxt(grammar);
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "RELAX NG validation context",
                        });
                    }
                    xmlRelaxNGSetValidStructuredErrors(
                        ctxt,
                        Some(structured_error_callback),
                        sink.user_data(),
                    );
                    let code = xmlRelaxNGValidateDoc(ctxt, doc.as_ptr());
                    xmlRelaxNGFreeValidCtxt(ctxt);
                    code
                }
                SchemaHandle::Schematron(grammar) => {
                    let ctxt = xmlSchematronNewValidCtxt(grammar, XML_SCHEMATRON_OUT_ERROR);
                    if ctxt.is_null() {
                        return Err(LibXml2Error::ContextCreationFailed {
                            context: "Schematron validation context",
                        });
                    }
                    xmlSchematronSetValidStructuredErrors(
                        ctxt,
                        Some(structured_error_callback),
                        sink.user_data(),
                    );
                    let code = xmlSchematronValidateDoc(ctxt, doc.as_ptr());
                    xmlSchematronFreeValidCtxt(ctxt);
                    code
                }
            }
        };

        Ok(ValidationResult::from_code(code))
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

/// libxml2 drops Schematron patterns that have neither `id` nor `name`, and
/// a schema left without rules cannot validate anything. Name anonymous
/// patterns and refuse rule-less schemas up front.
fn prepare_schematron(source: &mut XmlDocPtr, sink: &DiagnosticSink<'_>) -> LibXml2Result<bool> {
    let namespace = source.root_element().and_then(|root| root.namespace);
    if source.count_elements(namespace.as_deref(), "rule") == 0 {
        sink.report(Diagnostic::new(
            Severity::Fatal,
            "Schematron schema defines no rules",
        ));
        return Ok(false);
    }
    source.assign_missing_ids(namespace.as_deref(), "pattern")?;
    Ok(true)
}
