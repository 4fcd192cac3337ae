//! LibXML2 FFI Wrapper Module
//!
//! Safe wrappers around the parts of libxml2 the rewrite engine delegates to:
//! recovering document parsing, XPath evaluation with namespace bindings, in-place
//! tree edits, serialization with an output encoding, and XML Schema validation of
//! an in-memory document.
//!
//! ## Thread Safety Strategy
//!
//! According to official libxml2 documentation (http://xmlsoft.org/threads.html):
//!
//! - Parsing, XPath evaluation and validation are thread-safe for *different* documents
//! - Schema structures are thread-safe for reading after parsing
//! - Error handlers installed with `xmlSetStructuredErrorFunc` are per-thread
//!
//! **Our Implementation:**
//! - **Documents**: one [`XmlDocument`] per task; it is `Send` but not `Sync`, so a tree
//!   is only ever touched by the thread that currently owns it
//! - **Schema sharing**: Arc-wrapped pointers allow concurrent validation
//! - **Initialization**: guarded by `std::sync::Once`
//!
//! Node handles ([`XmlNodeRef`]) borrow the document they came from. No wrapper method
//! frees a node while its document is alive, so handles stay valid across writes.

use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::sync::{Arc, Once};

use libc::{c_char, c_double, c_int, c_void};

use crate::error::{LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
///
/// libxml2's initialization functions are NOT thread-safe, so they run exactly once.
static LIBXML2_INIT: Once = Once::new();

const XML_PARSE_RECOVER: c_int = 1 << 0;
const XML_PARSE_NONET: c_int = 1 << 11;
const XML_PARSE_NOCDATA: c_int = 1 << 14;

const XML_ELEMENT_NODE: c_int = 1;
const XML_ATTRIBUTE_NODE: c_int = 2;
const XML_TEXT_NODE: c_int = 3;
const XML_CDATA_SECTION_NODE: c_int = 4;
const XML_NAMESPACE_DECL: c_int = 18;

const XPATH_NODESET: c_int = 1;
const XPATH_BOOLEAN: c_int = 2;
const XPATH_NUMBER: c_int = 3;
const XPATH_STRING: c_int = 4;

// Opaque libxml2 structures
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
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlNs {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlXPathCompExpr {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlCharEncodingHandler {
    _private: [u8; 0],
}

/// Leading fields of `xmlNode`. `xmlAttr` shares everything up to `ns`;
/// `content` is only read for text and CDATA nodes.
#[repr(C)]
pub struct XmlNode {
    _private: *mut c_void,
    node_type: c_int,
    name: *const u8,
    children: *mut XmlNode,
    last: *mut XmlNode,
    parent: *mut XmlNode,
    next: *mut XmlNode,
    prev: *mut XmlNode,
    doc: *mut XmlDoc,
    ns: *mut XmlNs,
    content: *mut u8,
}

#[repr(C)]
pub struct XmlNodeSet {
    node_nr: c_int,
    node_max: c_int,
    node_tab: *mut *mut XmlNode,
}

#[repr(C)]
pub struct XmlXPathObject {
    object_type: c_int,
    nodesetval: *mut XmlNodeSet,
    boolval: c_int,
    floatval: c_double,
    stringval: *mut u8,
    user: *mut c_void,
    index: c_int,
    user2: *mut c_void,
    index2: c_int,
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

pub type XmlFreeFunc = Option<unsafe extern "C" fn(mem: *mut c_void)>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    #[allow(non_upper_case_globals)]
    pub static xmlFree: XmlFreeFunc;

    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // Document parsing and tree access
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlDocGetRootElement(doc: *const XmlDoc) -> *mut XmlNode;

    // Tree editing
    pub fn xmlNodeSetContent(node: *mut XmlNode, content: *const u8);
    pub fn xmlNewDocText(doc: *const XmlDoc, content: *const u8) -> *mut XmlNode;
    pub fn xmlAddChild(parent: *mut XmlNode, cur: *mut XmlNode) -> *mut XmlNode;
    pub fn xmlAddPrevSibling(cur: *mut XmlNode, elem: *mut XmlNode) -> *mut XmlNode;
    pub fn xmlSetNsProp(
        node: *mut XmlNode,
        ns: *mut XmlNs,
        name: *const u8,
        value: *const u8,
    ) -> *mut XmlNode;

    // XPath
    pub fn xmlXPathNewContext(doc: *mut XmlDoc) -> *mut XmlXPathContext;
    pub fn xmlXPathFreeContext(ctxt: *mut XmlXPathContext);
    pub fn xmlXPathRegisterNs(
        ctxt: *mut XmlXPathContext,
        prefix: *const u8,
        ns_uri: *const u8,
    ) -> c_int;
    pub fn xmlXPathNodeEval(
        node: *mut XmlNode,
        expr: *const u8,
        ctxt: *mut XmlXPathContext,
    ) -> *mut XmlXPathObject;
    pub fn xmlXPathFreeObject(obj: *mut XmlXPathObject);
    pub fn xmlXPathCompile(expr: *const u8) -> *mut XmlXPathCompExpr;
    pub fn xmlXPathFreeCompExpr(comp: *mut XmlXPathCompExpr);

    // Serialization
    pub fn xmlDocDumpFormatMemoryEnc(
        doc: *mut XmlDoc,
        mem: *mut *mut u8,
        size: *mut c_int,
        encoding: *const c_char,
        format: c_int,
    );
    pub fn xmlFindCharEncodingHandler(name: *const c_char) -> *mut XmlCharEncodingHandler;
    pub fn xmlCharEncCloseFunc(handler: *mut XmlCharEncodingHandler) -> c_int;

    // Schema parsing functions
    pub fn xmlSchemaNewMemParserCtxt(
        buffer: *const c_char,
        size: c_int,
    ) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *const XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation functions
    pub fn xmlSchemaNewValidCtxt(schema: *const XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        sherr: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
}

/// Callback for libxml2 to report errors (structured)
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *mut xmlError) {
    let errors = unsafe { &mut *(user_data as *mut Vec<String>) };

    if !error.is_null() {
        let msg_ptr = unsafe { (*error).message };
        let line = unsafe { (*error).line };
        if !msg_ptr.is_null() {
            let c_str = unsafe { CStr::from_ptr(msg_ptr) };
            let message = c_str.to_string_lossy();
            let message = message.trim();
            if line > 0 {
                errors.push(format!("line {}: {}", line, message));
            } else {
                errors.push(message.to_string());
            }
        }
    }
}

/// Routes the calling thread's generic libxml2 errors into a buffer until dropped.
struct ErrorCapture {
    errors: Box<Vec<String>>,
}

impl ErrorCapture {
    fn start() -> Self {
        let mut errors = Box::new(Vec::new());
        let errors_ptr = &mut *errors as *mut Vec<String> as *mut c_void;
        unsafe {
            xmlSetStructuredErrorFunc(errors_ptr, Some(structured_error_callback));
        }
        ErrorCapture { errors }
    }

    fn finish(mut self) -> Vec<String> {
        std::mem::take(&mut *self.errors)
    }
}

impl Drop for ErrorCapture {
    fn drop(&mut self) {
        unsafe {
            xmlSetStructuredErrorFunc(ptr::null_mut(), None);
        }
    }
}

fn to_c_string(value: &str) -> LibXml2Result<CString> {
    CString::new(value).map_err(|e| LibXml2Error::InvalidString {
        details: e.to_string(),
    })
}

/// Read a libxml2-owned, NUL-terminated UTF-8 string
unsafe fn xml_string(ptr: *const u8) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr as *const c_char) }
            .to_string_lossy()
            .into_owned()
    }
}

/// Parser options for [`LibXml2Wrapper::parse_document`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseOptions {
    /// Build a best-effort tree from malformed markup
    pub recover: bool,
    /// Keep CDATA sections as distinct nodes instead of folding them into text
    pub keep_cdata: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            recover: true,
            keep_cdata: false,
        }
    }
}

impl ParseOptions {
    fn bits(&self) -> c_int {
        let mut bits = XML_PARSE_NONET;
        if self.recover {
            bits |= XML_PARSE_RECOVER;
        }
        if !self.keep_cdata {
            bits |= XML_PARSE_NOCDATA;
        }
        bits
    }
}

/// An owned libxml2 document tree, freed on drop
pub struct XmlDocument {
    ptr: *mut XmlDoc,
}

// Safety: the tree is exclusively owned and XmlDocument is not Sync,
// so only one thread at a time can reach it.
unsafe impl Send for XmlDocument {}

impl XmlDocument {
    /// The root element, if the parser produced one
    pub fn root(&self) -> Option<XmlNodeRef<'_>> {
        let root = unsafe { xmlDocGetRootElement(self.ptr) };
        XmlNodeRef::from_raw(root)
    }
}

impl fmt::Debug for XmlDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlDocument")
            .field("ptr", &self.ptr)
            .finish()
    }
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlFreeDoc(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// A document together with the diagnostics the recovering parser emitted
#[derive(Debug)]
pub struct ParsedDocument {
    pub document: XmlDocument,
    pub warnings: Vec<String>,
}

/// libxml2 node types the engine distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Element,
    Attribute,
    Text,
    CData,
    Other(i32),
}

impl NodeType {
    fn from_raw(raw: c_int) -> Self {
        match raw {
            XML_ELEMENT_NODE => NodeType::Element,
            XML_ATTRIBUTE_NODE => NodeType::Attribute,
            XML_TEXT_NODE => NodeType::Text,
            XML_CDATA_SECTION_NODE => NodeType::CData,
            other => NodeType::Other(other),
        }
    }

    /// Human-readable name of the node type
    pub fn describe(&self) -> &'static str {
        match self {
            NodeType::Element => "element",
            NodeType::Attribute => "attribute",
            NodeType::Text => "text node",
            NodeType::CData => "CDATA section",
            NodeType::Other(7) => "processing instruction",
            NodeType::Other(8) => "comment",
            NodeType::Other(9) => "document",
            NodeType::Other(18) => "namespace declaration",
            NodeType::Other(_) => "unsupported node",
        }
    }
}

/// Borrowed handle to a node inside an [`XmlDocument`]
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct XmlNodeRef<'doc> {
    ptr: *mut XmlNode,
    _doc: PhantomData<&'doc XmlDocument>,
}

impl<'doc> XmlNodeRef<'doc> {
    fn from_raw(ptr: *mut XmlNode) -> Option<Self> {
        if ptr.is_null() {
            None
        } else {
            Some(XmlNodeRef {
                ptr,
                _doc: PhantomData,
            })
        }
    }

    pub fn node_type(&self) -> NodeType {
        NodeType::from_raw(unsafe { (*self.ptr).node_type })
    }

    /// Local name of an element or attribute
    pub fn name(&self) -> String {
        unsafe { xml_string((*self.ptr).name) }
    }

    pub fn parent(&self) -> Option<XmlNodeRef<'doc>> {
        XmlNodeRef::from_raw(unsafe { (*self.ptr).parent })
    }

    pub fn first_child(&self) -> Option<XmlNodeRef<'doc>> {
        XmlNodeRef::from_raw(unsafe { (*self.ptr).children })
    }

    pub fn next_sibling(&self) -> Option<XmlNodeRef<'doc>> {
        XmlNodeRef::from_raw(unsafe { (*self.ptr).next })
    }

    fn raw_content(&self) -> String {
        unsafe { xml_string((*self.ptr).content) }
    }

    fn is_character_data(&self) -> bool {
        matches!(self.node_type(), NodeType::Text | NodeType::CData)
    }

    /// Text and CDATA children that precede the first non-text child
    pub fn leading_text_nodes(&self) -> Vec<XmlNodeRef<'doc>> {
        let mut run = Vec::new();
        let mut cursor = self.first_child();
        while let Some(node) = cursor {
            if !node.is_character_data() {
                break;
            }
            run.push(node);
            cursor = node.next_sibling();
        }
        run
    }

    /// Textual value of the node.
    ///
    /// Elements yield their direct leading text, attributes their value, and text
    /// or CDATA nodes their content.
    pub fn value(&self) -> String {
        match self.node_type() {
            NodeType::Text | NodeType::CData => self.raw_content(),
            NodeType::Attribute => {
                let mut value = String::new();
                let mut cursor = self.first_child();
                while let Some(node) = cursor {
                    value.push_str(&node.raw_content());
                    cursor = node.next_sibling();
                }
                value
            }
            NodeType::Element => self
                .leading_text_nodes()
                .iter()
                .map(|node| node.raw_content())
                .collect(),
            NodeType::Other(_) => String::new(),
        }
    }

    /// Replace the textual value of the node.
    ///
    /// Element children other than the leading text are kept, and a leading CDATA
    /// section stays a CDATA section.
    pub fn set_value(&self, value: &str) -> LibXml2Result<()> {
        let c_value = to_c_string(value)?;
        match self.node_type() {
            NodeType::Text | NodeType::CData => {
                unsafe { xmlNodeSetContent(self.ptr, c_value.as_ptr() as *const u8) };
                Ok(())
            }
            NodeType::Attribute => match self.first_child() {
                Some(first) if first.is_character_data() => {
                    first.set_value(value)?;
                    first.blank_following_siblings();
                    Ok(())
                }
                _ => {
                    let owner = unsafe { (*self.ptr).parent };
                    let attr = unsafe {
                        xmlSetNsProp(
                            owner,
                            (*self.ptr).ns,
                            (*self.ptr).name,
                            c_value.as_ptr() as *const u8,
                        )
                    };
                    if attr.is_null() {
                        return Err(LibXml2Error::MemoryAllocation);
                    }
                    Ok(())
                }
            },
            NodeType::Element => {
                let run = self.leading_text_nodes();
                if let Some(first) = run.first() {
                    first.set_value(value)?;
                    for node in &run[1..] {
                        node.set_value("")?;
                    }
                    return Ok(());
                }

                let text = unsafe { xmlNewDocText((*self.ptr).doc, c_value.as_ptr() as *const u8) };
                if text.is_null() {
                    return Err(LibXml2Error::MemoryAllocation);
                }
                let inserted = match self.first_child() {
                    Some(first) => unsafe { xmlAddPrevSibling(first.ptr, text) },
                    None => unsafe { xmlAddChild(self.ptr, text) },
                };
                if inserted.is_null() {
                    return Err(LibXml2Error::MemoryAllocation);
                }
                Ok(())
            }
            other => Err(LibXml2Error::UnsupportedNode {
                kind: other.describe().to_string(),
            }),
        }
    }

    fn blank_following_siblings(&self) {
        let mut cursor = self.next_sibling();
        while let Some(node) = cursor {
            if node.is_character_data() {
                unsafe { xmlNodeSetContent(node.ptr, c"".as_ptr() as *const u8) };
            }
            cursor = node.next_sibling();
        }
    }
}

impl fmt::Debug for XmlNodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XmlNodeRef")
            .field("type", &self.node_type())
            .field("name", &self.name())
            .finish()
    }
}

/// One entry of an XPath node-set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XPathNode<'doc> {
    /// A node of the document tree
    Tree(XmlNodeRef<'doc>),
    /// A node that did not outlive the XPath result, known only by its type
    Transient(NodeType),
}

/// Result of evaluating an XPath expression
#[derive(Debug, Clone, PartialEq)]
pub enum XPathValue<'doc> {
    /// Node-set, in document order
    Nodes(Vec<XPathNode<'doc>>),
    Boolean(bool),
    Number(f64),
    String(String),
    /// Any other libxml2 object type
    Other(i32),
}

/// Frees an XPath context when dropped
struct XPathContextGuard(*mut XmlXPathContext);

impl Drop for XPathContextGuard {
    fn drop(&mut self) {
        unsafe { xmlXPathFreeContext(self.0) };
    }
}

/// Thread-safe wrapper for libxml2 schema pointer with proper resource management
#[derive(Debug)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: libxml2 documentation states that xmlSchema structures are thread-safe for reading
// See: http://xmlsoft.org/threads.html
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// Create a new XmlSchemaPtr from a raw pointer
    ///
    /// # Safety
    ///
    /// The pointer must come from `xmlSchemaParse` and must not be freed elsewhere.
    pub(crate) unsafe fn from_raw(ptr: *mut XmlSchema) -> LibXml2Result<Self> {
        if ptr.is_null() {
            return Err(LibXml2Error::SchemaParseFailed {
                details: "null schema pointer".to_string(),
            });
        }

        Ok(XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                _phantom: PhantomData,
            }),
        })
    }

    pub(crate) fn as_ptr(&self) -> *const XmlSchema {
        self.inner.ptr
    }

    /// Check if the schema pointer is valid (non-null)
    pub fn is_valid(&self) -> bool {
        !self.inner.ptr.is_null()
    }
}

impl Clone for XmlSchemaPtr {
    fn clone(&self) -> Self {
        XmlSchemaPtr {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                xmlSchemaFree(self.ptr);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

/// Validation result from libxml2
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation succeeded (return code 0)
    Valid,
    /// Validation failed with errors (return code > 0)
    Invalid {
        error_count: i32,
        errors: Vec<String>,
    },
    /// Internal error occurred (return code < 0)
    InternalError { code: i32 },
}

impl ValidationResult {
    /// Create ValidationResult from libxml2 return code and captured errors
    pub fn from_code(code: c_int, errors: Vec<String>) -> Self {
        match code {
            0 => ValidationResult::Valid,
            n if n > 0 => ValidationResult::Invalid {
                error_count: n,
                errors,
            },
            n => ValidationResult::InternalError { code: n },
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, ValidationResult::Invalid { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ValidationResult::InternalError { .. })
    }
}

/// LibXML2 wrapper providing safe access to libxml2 functionality
#[derive(Debug)]
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Create a new LibXML2 wrapper instance.
    ///
    /// Initializes libxml2 on first use; safe to call any number of times.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse a document from memory.
    ///
    /// With `options.recover` set, malformed markup yields a partial tree plus
    /// the parser's diagnostics in [`ParsedDocument::warnings`].
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::DocumentParseFailed` when no tree with a root element
    /// could be built.
    pub fn parse_document(
        &self,
        data: &[u8],
        url: &str,
        options: ParseOptions,
    ) -> LibXml2Result<ParsedDocument> {
        let size = c_int::try_from(data.len()).map_err(|_| LibXml2Error::DocumentParseFailed {
            details: format!("document of {} bytes is too large", data.len()),
        })?;
        let c_url = to_c_string(url)?;

        let capture = ErrorCapture::start();
        let doc_ptr = unsafe {
            xmlReadMemory(
                data.as_ptr() as *const c_char,
                size,
                c_url.as_ptr(),
                ptr::null(),
                options.bits(),
            )
        };
        let warnings = capture.finish();

        if doc_ptr.is_null() {
            return Err(LibXml2Error::DocumentParseFailed {
                details: summarize(&warnings, "parser returned no document"),
            });
        }

        let document = XmlDocument { ptr: doc_ptr };
        if document.root().is_none() {
            return Err(LibXml2Error::DocumentParseFailed {
                details: summarize(&warnings, "document has no root element"),
            });
        }

        Ok(ParsedDocument { document, warnings })
    }

    /// Check that an XPath expression is syntactically valid
    pub fn compile_xpath(&self, expression: &str) -> LibXml2Result<()> {
        let c_expr = to_c_string(expression)?;

        let capture = ErrorCapture::start();
        let comp = unsafe { xmlXPathCompile(c_expr.as_ptr() as *const u8) };
        let errors = capture.finish();

        if comp.is_null() {
            return Err(LibXml2Error::XPathCompileFailed {
                expression: expression.to_string(),
                details: summarize(&errors, "invalid expression"),
            });
        }
        unsafe { xmlXPathFreeCompExpr(comp) };
        Ok(())
    }

    /// Evaluate an XPath expression with the root element as context node.
    ///
    /// Every `(prefix, uri)` pair in `namespaces` is registered on the context first.
    pub fn evaluate_xpath<'doc>(
        &self,
        document: &'doc XmlDocument,
        expression: &str,
        namespaces: &BTreeMap<String, String>,
    ) -> LibXml2Result<XPathValue<'doc>> {
        let c_expr = to_c_string(expression)?;
        let root = document
            .root()
            .ok_or_else(|| LibXml2Error::XPathEvaluationFailed {
                expression: expression.to_string(),
                details: "document has no root element".to_string(),
            })?;

        let ctxt = unsafe { xmlXPathNewContext(document.ptr) };
        if ctxt.is_null() {
            return Err(LibXml2Error::XPathContextCreationFailed);
        }
        let ctxt = XPathContextGuard(ctxt);

        for (prefix, uri) in namespaces {
            let c_prefix = to_c_string(prefix)?;
            let c_uri = to_c_string(uri)?;
            let rc = unsafe {
                xmlXPathRegisterNs(
                    ctxt.0,
                    c_prefix.as_ptr() as *const u8,
                    c_uri.as_ptr() as *const u8,
                )
            };
            if rc != 0 {
                return Err(LibXml2Error::NamespaceRegistrationFailed {
                    prefix: prefix.clone(),
                });
            }
        }

        let capture = ErrorCapture::start();
        let obj = unsafe { xmlXPathNodeEval(root.ptr, c_expr.as_ptr() as *const u8, ctxt.0) };
        let errors = capture.finish();

        if obj.is_null() {
            return Err(LibXml2Error::XPathEvaluationFailed {
                expression: expression.to_string(),
                details: summarize(&errors, "evaluation produced no result"),
            });
        }

        let value = unsafe {
            match (*obj).object_type {
                XPATH_NODESET => {
                    let set = (*obj).nodesetval;
                    let mut nodes = Vec::new();
                    if !set.is_null() && !(*set).node_tab.is_null() {
                        for i in 0..(*set).node_nr.max(0) as usize {
                            let Some(node) = XmlNodeRef::from_raw(*(*set).node_tab.add(i)) else {
                                continue;
                            };
                            // Namespace nodes are copies freed along with `obj`
                            let raw_type = (*node.ptr).node_type;
                            if raw_type == XML_NAMESPACE_DECL {
                                nodes.push(XPathNode::Transient(NodeType::from_raw(raw_type)));
                            } else {
                                nodes.push(XPathNode::Tree(node));
                            }
                        }
                    }
                    XPathValue::Nodes(nodes)
                }
                XPATH_BOOLEAN => XPathValue::Boolean((*obj).boolval != 0),
                XPATH_NUMBER => XPathValue::Number((*obj).floatval),
                XPATH_STRING => XPathValue::String(xml_string((*obj).stringval)),
                other => XPathValue::Other(other),
            }
        };
        unsafe { xmlXPathFreeObject(obj) };

        Ok(value)
    }

    /// Check whether libxml2 can encode output in the named encoding
    pub fn supports_encoding(&self, encoding: &str) -> bool {
        let Ok(c_enc) = CString::new(encoding) else {
            return false;
        };
        let handler = unsafe { xmlFindCharEncodingHandler(c_enc.as_ptr()) };
        if handler.is_null() {
            return false;
        }
        unsafe { xmlCharEncCloseFunc(handler) };
        true
    }

    /// Serialize a document, XML declaration included.
    ///
    /// `format` enables libxml2's indenting output.
    pub fn serialize_document(
        &self,
        document: &XmlDocument,
        encoding: &str,
        format: bool,
    ) -> LibXml2Result<Vec<u8>> {
        let c_enc = to_c_string(encoding)?;
        let mut mem: *mut u8 = ptr::null_mut();
        let mut size: c_int = 0;

        unsafe {
            xmlDocDumpFormatMemoryEnc(
                document.ptr,
                &mut mem,
                &mut size,
                c_enc.as_ptr(),
                c_int::from(format),
            );
        }

        if mem.is_null() {
            return Err(LibXml2Error::SerializationFailed {
                encoding: encoding.to_string(),
            });
        }

        let bytes = unsafe { std::slice::from_raw_parts(mem, size.max(0) as usize) }.to_vec();
        unsafe {
            if let Some(free) = xmlFree {
                free(mem as *mut c_void);
            }
        }

        if bytes.is_empty() {
            return Err(LibXml2Error::SerializationFailed {
                encoding: encoding.to_string(),
            });
        }
        Ok(bytes)
    }

    /// Parse an XML schema from memory buffer
    ///
    /// **IMPORTANT**: Schema parsing is NOT thread-safe in libxml2. Schemas are parsed
    /// once per run, before any worker starts.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::SchemaParseFailed` if the schema cannot be parsed.
    /// Returns `LibXml2Error::MemoryAllocation` if memory allocation fails.
    pub fn parse_schema_from_memory(&self, schema_data: &[u8]) -> LibXml2Result<XmlSchemaPtr> {
        let size =
            c_int::try_from(schema_data.len()).map_err(|_| LibXml2Error::SchemaParseFailed {
                details: "schema is too large".to_string(),
            })?;

        unsafe {
            let parser_ctxt =
                xmlSchemaNewMemParserCtxt(schema_data.as_ptr() as *const c_char, size);

            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }

            let mut errors: Vec<String> = Vec::new();
            let errors_ptr = &mut errors as *mut Vec<String> as *mut c_void;
            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                errors_ptr,
            );

            // The schema document itself is parsed through the generic handler.
            let capture = ErrorCapture::start();
            let schema_ptr = xmlSchemaParse(parser_ctxt);
            errors.extend(capture.finish());

            // Always free the parser context
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema_ptr.is_null() {
                return Err(LibXml2Error::SchemaParseFailed {
                    details: summarize(&errors, "not a valid XML Schema"),
                });
            }

            XmlSchemaPtr::from_raw(schema_ptr)
        }
    }

    /// Validate an in-memory document against a schema.
    ///
    /// Each call creates its own validation context, so concurrent calls on
    /// different documents may share one schema.
    ///
    /// # Errors
    ///
    /// Returns `LibXml2Error::ValidationContextCreationFailed` if the context cannot be
    /// created and `LibXml2Error::ValidationFailed` on an internal validator error.
    pub fn validate_document(
        &self,
        schema: &XmlSchemaPtr,
        document: &XmlDocument,
    ) -> LibXml2Result<ValidationResult> {
        unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }

            let mut errors = Vec::new();
            let errors_ptr = &mut errors as *mut Vec<String> as *mut c_void;
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                errors_ptr,
            );

            let result_code = xmlSchemaValidateDoc(valid_ctxt, document.ptr);

            xmlSchemaFreeValidCtxt(valid_ctxt);

            match ValidationResult::from_code(result_code, errors) {
                ValidationResult::InternalError { code } => {
                    Err(LibXml2Error::ValidationFailed { code })
                }
                result => Ok(result),
            }
        }
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn summarize(errors: &[String], fallback: &str) -> String {
    if errors.is_empty() {
        fallback.to_string()
    } else {
        errors.join("; ")
    }
}
