//! Descriptor and request types for the control client.

/// A document to index: opaque JSON body, optional id, optional routing
/// key. Identity is the id when present; otherwise the server assigns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentWithId {
    pub id: Option<String>,
    pub routing: Option<String>,
    pub json: String,
}

impl DocumentWithId {
    pub fn new(json: impl Into<String>) -> Self {
        Self {
            id: None,
            routing: None,
            json: json.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }
}

/// One entry of a bulk indexing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
    pub index: String,
    pub id: Option<String>,
    pub routing: Option<String>,
    pub document: String,
}

impl IndexRequest {
    pub fn new(index: impl Into<String>, document: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            id: None,
            routing: None,
            document: document.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    pub(crate) fn from_document(index: &str, document: &DocumentWithId) -> Self {
        Self {
            index: index.to_string(),
            id: document.id.clone(),
            routing: document.routing.clone(),
            document: document.json.clone(),
        }
    }
}

/// An index to create at startup: name, optional raw settings/mappings
/// JSON, and documents to load right after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub name: String,
    pub settings_json: Option<String>,
    pub documents: Vec<DocumentWithId>,
}

impl IndexDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings_json: None,
            documents: Vec::new(),
        }
    }

    /// Raw settings/mappings/aliases body sent verbatim with the create
    /// request; structural validity is the server's concern.
    pub fn with_settings(mut self, settings_json: impl Into<String>) -> Self {
        self.settings_json = Some(settings_json.into());
        self
    }

    pub fn with_document(mut self, document: DocumentWithId) -> Self {
        self.documents.push(document);
        self
    }
}

/// An index template to create at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDescriptor {
    pub name: String,
    pub body: String,
}

impl TemplateDescriptor {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
        }
    }
}
