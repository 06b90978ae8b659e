//! Running call transcript.

use crate::transport::Speaker;

/// Text accumulated over a call, one line per speaker turn.
///
/// Fragments from the same speaker are concatenated verbatim (streaming
/// transcription carries its own spacing). A change of speaker or a
/// completed turn starts a new line.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    text: String,
    last_speaker: Option<Speaker>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, speaker: Speaker, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.last_speaker.is_some_and(|last| last != speaker) {
            self.break_line();
        }
        self.text.push_str(fragment);
        self.last_speaker = Some(speaker);
    }

    /// Close the current line.
    pub fn end_turn(&mut self) {
        self.break_line();
        self.last_speaker = None;
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.last_speaker = None;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    fn break_line(&mut self) {
        if !self.text.is_empty() && !self.text.ends_with('\n') {
            self.text.push('\n');
        }
    }
}
