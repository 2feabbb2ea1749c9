//! Structured output of the extraction collaborator: named, typed elements
//! of the design source and named, typed slots of the target template.

use serde::{Deserialize, Serialize};

use crate::geometry::{Canvas, Geometry};

/// Content kind of an element or slot. Only equal kinds may be associated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Image,
    Other,
}

impl ContentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
            ContentKind::Other => "other",
        }
    }
}

/// A layer or region extracted from the design source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceElement {
    pub name: String,
    pub kind: ContentKind,
    /// `None` when the parser could not resolve bounds for the layer.
    pub geometry: Option<Geometry>,
}

/// A placeholder in the target template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateSlot {
    pub name: String,
    pub kind: ContentKind,
    pub geometry: Option<Geometry>,
}

/// Stage-1 payload: everything extraction produced for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub elements: Vec<SourceElement>,
    pub slots: Vec<TemplateSlot>,
    pub source_canvas: Option<Canvas>,
    pub template_canvas: Option<Canvas>,
}

impl ExtractionResult {
    pub fn element(&self, index: usize) -> Option<&SourceElement> {
        self.elements.get(index)
    }

    pub fn slot(&self, index: usize) -> Option<&TemplateSlot> {
        self.slots.get(index)
    }
}
