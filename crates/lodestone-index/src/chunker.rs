//! Recursive separator splitting with overlap and line-span tracking.

/// Separators tried coarse to fine: paragraph break, line break, sentence
/// enders (western, then fullwidth), word boundary. The empty string marks
/// the hard character cut.
const SEPARATORS: &[&str] = &[
    "\n\n", "\n", ". ", "! ", "? ", "。", "．", "！", "？", " ", "",
];

#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self { chunk_size: 1000 }
    }
}

impl ChunkerConfig {
    /// Characters carried over between consecutive chunks, 15% of the
    /// chunk size rounded down.
    #[must_use]
    pub fn overlap(&self) -> usize {
        self.chunk_size * 15 / 100
    }
}

/// One chunk with its 1-based inclusive line span in the source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug)]
pub struct Chunker {
    config: ChunkerConfig,
}

/// Byte range of one split piece plus its character count. Pieces are
/// contiguous in source order.
#[derive(Debug, Clone, Copy)]
struct Piece {
    start: usize,
    end: usize,
    chars: usize,
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self { config }
    }

    /// Split `text` into overlapping chunks of at most `chunk_size`
    /// characters. Chunk content is trimmed; whitespace-only chunks are
    /// dropped.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let size = self.config.chunk_size.max(1);

        let mut pieces = Vec::new();
        split_range(text, 0, text.len(), SEPARATORS, size, &mut pieces);

        let newlines: Vec<usize> = text.match_indices('\n').map(|(i, _)| i).collect();
        merge_pieces(text, &pieces, size, self.config.overlap(), &newlines)
    }
}

fn split_range(
    text: &str,
    start: usize,
    end: usize,
    separators: &[&str],
    size: usize,
    out: &mut Vec<Piece>,
) {
    let segment = &text[start..end];
    let chars = segment.chars().count();
    if chars <= size {
        out.push(Piece { start, end, chars });
        return;
    }

    let found = separators
        .iter()
        .copied()
        .enumerate()
        .find(|&(_, s)| !s.is_empty() && segment.contains(s));
    let Some((idx, sep)) = found else {
        split_chars(text, start, end, size, out);
        return;
    };

    for (piece_start, piece_end) in split_at_separator(text, start, end, sep) {
        let piece_chars = text[piece_start..piece_end].chars().count();
        if piece_chars <= size {
            out.push(Piece {
                start: piece_start,
                end: piece_end,
                chars: piece_chars,
            });
        } else {
            // Finer separators only, so the recursion always terminates.
            split_range(text, piece_start, piece_end, &separators[idx + 1..], size, out);
        }
    }
}

/// Split on every occurrence of `sep`, keeping the separator attached to the
/// preceding piece.
fn split_at_separator(text: &str, start: usize, end: usize, sep: &str) -> Vec<(usize, usize)> {
    let segment = &text[start..end];
    let mut pieces = Vec::new();
    let mut piece_start = start;
    let mut from = 0;

    while let Some(pos) = segment[from..].find(sep) {
        let sep_end = from + pos + sep.len();
        pieces.push((piece_start, start + sep_end));
        piece_start = start + sep_end;
        from = sep_end;
    }
    if piece_start < end {
        pieces.push((piece_start, end));
    }
    pieces
}

/// Hard cut into windows of exactly `size` characters, on char boundaries.
fn split_chars(text: &str, start: usize, end: usize, size: usize, out: &mut Vec<Piece>) {
    let mut piece_start = start;
    let mut count = 0;

    for (offset, _) in text[start..end].char_indices() {
        if count == size {
            out.push(Piece {
                start: piece_start,
                end: start + offset,
                chars: size,
            });
            piece_start = start + offset;
            count = 0;
        }
        count += 1;
    }
    if piece_start < end {
        out.push(Piece {
            start: piece_start,
            end,
            chars: count,
        });
    }
}

/// Merge pieces into chunks, carrying `overlap` characters of trailing pieces
/// into the next chunk.
fn merge_pieces(
    text: &str,
    pieces: &[Piece],
    size: usize,
    overlap: usize,
    newlines: &[usize],
) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut window: Vec<Piece> = Vec::new();
    let mut window_chars = 0;

    for &piece in pieces {
        if window_chars + piece.chars > size && !window.is_empty() {
            push_chunk(text, &window, newlines, &mut chunks);

            // Walk backwards over the emitted window to build the overlap.
            let mut keep_from = window.len();
            let mut kept = 0;
            for (i, p) in window.iter().enumerate().rev() {
                if kept + p.chars > overlap {
                    break;
                }
                kept += p.chars;
                keep_from = i;
            }
            window.drain(..keep_from);
            window_chars = kept;

            // Shed overlap pieces that would push the next chunk past the size.
            while window_chars + piece.chars > size {
                let Some(first) = window.first().copied() else {
                    break;
                };
                window_chars -= first.chars;
                window.remove(0);
            }
        }
        window.push(piece);
        window_chars += piece.chars;
    }

    if !window.is_empty() {
        push_chunk(text, &window, newlines, &mut chunks);
    }
    chunks
}

fn push_chunk(text: &str, window: &[Piece], newlines: &[usize], chunks: &mut Vec<Chunk>) {
    let (Some(first), Some(last)) = (window.first(), window.last()) else {
        return;
    };
    let raw = &text[first.start..last.end];
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return;
    }

    let lead = raw.len() - raw.trim_start().len();
    let content_start = first.start + lead;
    let content_end = content_start + trimmed.len();

    chunks.push(Chunk {
        content: trimmed.to_owned(),
        start_line: line_at(newlines, content_start),
        end_line: line_at(newlines, content_end - 1),
    });
}

/// 1-based line number of the byte at `offset`.
fn line_at(newlines: &[usize], offset: usize) -> usize {
    newlines.partition_point(|&n| n < offset) + 1
}
