//! Attribute names and envelope layout per CloudEvents version.

/// Header names of the core context attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudEventAttributes {
    pub id: &'static str,
    pub source: &'static str,
    pub spec: &'static str,
    pub event_type: &'static str,
    pub time: &'static str,
}

impl CloudEventAttributes {
    pub fn all(&self) -> [&'static str; 5] {
        [self.id, self.source, self.spec, self.event_type, self.time]
    }
}

/// How envelope field names map to message header names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderNaming {
    /// `CE-` followed by the field name with its first character upper-cased.
    Capitalized,
    /// `ce-` followed by the field name lower-cased.
    Lowercase,
}

impl HeaderNaming {
    pub fn prefix(&self) -> &'static str {
        match self {
            HeaderNaming::Capitalized => "CE-",
            HeaderNaming::Lowercase => "ce-",
        }
    }

    /// Header name for an envelope field.
    pub fn header_for(&self, field: &str) -> String {
        match self {
            HeaderNaming::Capitalized => format!("CE-{}", capitalize(field)),
            HeaderNaming::Lowercase => format!("ce-{}", field.to_lowercase()),
        }
    }

    /// Envelope field for a prefixed header, `None` if the header is not prefixed.
    pub fn field_for(&self, header: &str) -> Option<String> {
        let prefix = self.prefix();
        if header.len() <= prefix.len() || !header.is_char_boundary(prefix.len()) {
            return None;
        }
        let (head, rest) = header.split_at(prefix.len());
        if !head.eq_ignore_ascii_case(prefix) {
            return None;
        }
        Some(match self {
            HeaderNaming::Capitalized => decapitalize(rest),
            HeaderNaming::Lowercase => rest.to_lowercase(),
        })
    }
}

/// Where binary event data travels in a structured envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Carrier {
    /// Not supported; non-UTF-8 data is sent as a base64 string in `data`.
    None,
    /// `datacontentencoding: base64` marks `data` as base64 (0.3).
    ContentEncoding,
    /// A separate `data_base64` field (1.0).
    DataBase64,
}

/// Structured-mode envelope layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructuredLayout {
    pub content_type_field: &'static str,
    pub naming: HeaderNaming,
    /// Whether an `extensions` object is flattened into plain headers.
    pub extensions_object: bool,
    pub base64: Base64Carrier,
}

/// Descriptor of one CloudEvents version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudEvent {
    pub version: &'static str,
    pub attributes: CloudEventAttributes,
    pub layout: StructuredLayout,
}

impl CloudEvent {
    pub fn is_cloud_event_header(&self, name: &str) -> bool {
        self.attributes
            .all()
            .iter()
            .any(|a| a.eq_ignore_ascii_case(name))
            || self.layout.naming.field_for(name).is_some()
    }
}

/// Upper-case the first character (ASCII only).
pub(crate) fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

fn decapitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_ascii_lowercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

const LOWERCASE_ATTRIBUTES: CloudEventAttributes = CloudEventAttributes {
    id: "ce-id",
    source: "ce-source",
    spec: "ce-specversion",
    event_type: "ce-type",
    time: "ce-time",
};

pub(crate) const V01: CloudEvent = CloudEvent {
    version: "0.1",
    attributes: CloudEventAttributes {
        id: "CE-EventID",
        source: "CE-Source",
        spec: "CE-CloudEventsVersion",
        event_type: "CE-EventType",
        time: "CE-EventTime",
    },
    layout: StructuredLayout {
        content_type_field: "contentType",
        naming: HeaderNaming::Capitalized,
        extensions_object: true,
        base64: Base64Carrier::None,
    },
};

pub(crate) const V02: CloudEvent = CloudEvent {
    version: "0.2",
    attributes: LOWERCASE_ATTRIBUTES,
    layout: StructuredLayout {
        content_type_field: "contenttype",
        naming: HeaderNaming::Lowercase,
        extensions_object: true,
        base64: Base64Carrier::None,
    },
};

pub(crate) const V03: CloudEvent = CloudEvent {
    version: "0.3",
    attributes: LOWERCASE_ATTRIBUTES,
    layout: StructuredLayout {
        content_type_field: "datacontenttype",
        naming: HeaderNaming::Lowercase,
        extensions_object: false,
        base64: Base64Carrier::ContentEncoding,
    },
};

pub(crate) const V1: CloudEvent = CloudEvent {
    version: "1.0",
    attributes: LOWERCASE_ATTRIBUTES,
    layout: StructuredLayout {
        content_type_field: "datacontenttype",
        naming: HeaderNaming::Lowercase,
        extensions_object: false,
        base64: Base64Carrier::DataBase64,
    },
};
