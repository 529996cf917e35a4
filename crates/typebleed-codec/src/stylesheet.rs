use std::collections::BTreeSet;
use std::fmt::Write;
use typebleed_core::{CaptureConfig, Codepoint, SessionId};

/// Per-session `@font-face` stylesheet.
///
/// One rule per registered codepoint, each restricted by `unicode-range` to
/// that single character, so the renderer fetches exactly the glyph files of
/// the characters it lays out.
#[derive(Debug, Clone)]
pub struct FontFaceSheet {
    family: String,
    prefix: String,
    extension: String,
}

impl FontFaceSheet {
    pub fn new(family: impl Into<String>, capture: &CaptureConfig) -> Self {
        Self {
            family: family.into(),
            prefix: capture.prefix.trim_matches('/').to_string(),
            extension: capture.extension.clone(),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// Font format hint derived from the file extension.
    fn format(&self) -> &str {
        match self.extension.as_str() {
            "ttf" => "truetype",
            "otf" => "opentype",
            other => other,
        }
    }

    pub fn url(&self, session: &SessionId, codepoint: Codepoint) -> String {
        format!(
            "/{}/{}/{}.{}",
            self.prefix,
            session,
            codepoint.identifier(),
            self.extension
        )
    }

    pub fn render(&self, session: &SessionId, alphabet: &BTreeSet<Codepoint>) -> String {
        let mut css = String::with_capacity(160 * alphabet.len() + 96);
        let _ = writeln!(css, "/* TypeBleed per-session stylesheet */");
        let _ = writeln!(css, "/* Session: {} */", session);
        for &cp in alphabet {
            let _ = write!(
                css,
                "\n@font-face {{\n  font-family: '{}';\n  src: url('{}') format('{}');\n  unicode-range: U+{}; /* {} */\n}}\n",
                self.family,
                self.url(session, cp),
                self.format(),
                cp.identifier(),
                cp.display()
            );
        }
        css
    }
}
