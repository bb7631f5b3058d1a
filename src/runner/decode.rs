//! Output decoder - bytes to text with a prioritized encoding fallback chain
//!
//! Console tools on legacy hosts emit output in the OEM/ANSI codepage rather
//! than UTF-8, and the codepage is not reliably knowable up front. The chain
//! tries each encoding strictly (whole sequence must decode) and only falls
//! back to lossy UTF-8 when every candidate rejects the bytes, so output is
//! never dropped and decoding never fails.

use encoding_rs::{Encoding, UTF_8, WINDOWS_1251};

/// Decodes raw process output using a prioritized list of encodings.
///
/// The default chain is windows-1251 before UTF-8, matching hosts whose
/// console codepage predates Unicode. Callers targeting other locales can
/// supply their own chain via [`OutputDecoder::new`].
#[derive(Debug, Clone)]
pub struct OutputDecoder {
    chain: Vec<&'static Encoding>,
}

impl Default for OutputDecoder {
    fn default() -> Self {
        Self::new(vec![WINDOWS_1251, UTF_8])
    }
}

impl OutputDecoder {
    /// Create a decoder with an explicit fallback chain, tried in order.
    pub fn new(chain: Vec<&'static Encoding>) -> Self {
        Self { chain }
    }

    /// Decode raw bytes into text. `None` means "no output" and decodes to
    /// an empty string.
    pub fn decode(&self, raw: Option<&[u8]>) -> String {
        let Some(bytes) = raw else {
            return String::new();
        };

        for encoding in &self.chain {
            // Strict pass: the whole sequence must decode without error.
            if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(bytes)
            {
                if !strict_pass_rejects(encoding, &text) {
                    return text.into_owned();
                }
            }
        }

        // Last resort: lossy UTF-8 with replacement characters.
        let (text, _, _) = UTF_8.decode(bytes);
        text.into_owned()
    }
}

/// The WHATWG windows-1251 index maps all 256 bytes, decoding 0x98 to
/// U+0098 even though the codepage leaves that byte unassigned. A strict
/// pass that produced it did not really succeed; fall through the chain.
fn strict_pass_rejects(encoding: &Encoding, text: &str) -> bool {
    encoding == WINDOWS_1251 && text.contains('\u{0098}')
}
