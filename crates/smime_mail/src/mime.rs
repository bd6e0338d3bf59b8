use lettre::message::{MultiPart, SinglePart};

/// Complete MIME entity: header fields, a blank line and the body, as raw bytes.
///
/// This is the unit S/MIME operates on. Signing wraps an entity into a
/// `multipart/signed` entity, encryption into an opaque `application/pkcs7-mime` one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MimeEntity {
    raw: Vec<u8>,
}

impl MimeEntity {
    #[must_use]
    pub fn from_bytes(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Header fields with their continuation lines, followed by the offset of the blank
    /// line separating them from the body.
    fn fields(&self) -> (Vec<&[u8]>, usize) {
        let mut fields: Vec<&[u8]> = Vec::new();
        let mut field_start = 0;
        let mut offset = 0;
        for line in self.raw.split_inclusive(|byte| *byte == b'\n') {
            if line == b"\r\n" || line == b"\n" {
                break;
            }
            let is_continuation = matches!(line.first(), Some(b' ' | b'\t'));
            if !is_continuation && offset > field_start {
                fields.push(&self.raw[field_start..offset]);
                field_start = offset;
            }
            offset += line.len();
        }
        if offset > field_start {
            fields.push(&self.raw[field_start..offset]);
        }

        (fields, offset)
    }

    /// Unfolded value of the first header field called `name` (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        let (fields, _) = self.fields();
        fields.into_iter().find_map(|field| {
            let field = String::from_utf8_lossy(field);
            let (field_name, value) = field.split_once(':')?;
            if !field_name.trim().eq_ignore_ascii_case(name) {
                return None;
            }
            let unfolded = value
                .split(['\r', '\n'])
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            Some(unfolded)
        })
    }

    #[must_use]
    pub fn content_type(&self) -> Option<String> {
        self.header("Content-Type")
    }

    /// `type/subtype` of the entity, lowercased, without parameters.
    #[must_use]
    pub fn media_type(&self) -> Option<String> {
        let content_type = self.content_type()?;
        let media_type = content_type.split(';').next()?.trim();
        Some(media_type.to_ascii_lowercase())
    }

    /// Remove every header field called `name`, keeping the rest of the entity byte-exact.
    #[must_use]
    pub fn without_header(self, name: &str) -> Self {
        let (fields, header_len) = self.fields();
        let mut raw = Vec::with_capacity(self.raw.len());
        for field in fields {
            let field_name = field
                .iter()
                .position(|byte| *byte == b':')
                .map(|colon| String::from_utf8_lossy(&field[..colon]));
            if field_name.is_some_and(|field_name| field_name.trim().eq_ignore_ascii_case(name)) {
                continue;
            }
            raw.extend_from_slice(field);
        }
        raw.extend_from_slice(&self.raw[header_len..]);

        Self { raw }
    }
}

impl From<MultiPart> for MimeEntity {
    fn from(part: MultiPart) -> Self {
        Self::from_bytes(part.formatted())
    }
}

impl From<SinglePart> for MimeEntity {
    fn from(part: SinglePart) -> Self {
        Self::from_bytes(part.formatted())
    }
}
