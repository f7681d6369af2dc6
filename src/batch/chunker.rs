use std::num::NonZeroUsize;

/// Split `items` into consecutive groups of `chunk_size`, preserving order
///
/// Every group is full except possibly the last one. An empty input yields no
/// groups.
pub fn chunk<T>(items: Vec<T>, chunk_size: NonZeroUsize) -> Vec<Vec<T>> {
    let size = chunk_size.get();
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut items = items.into_iter().peekable();

    while items.peek().is_some() {
        chunks.push(items.by_ref().take(size).collect());
    }

    chunks
}

/// Number of chunks [`chunk`] produces for `len` items
pub fn chunk_count(len: usize, chunk_size: NonZeroUsize) -> usize {
    len.div_ceil(chunk_size.get())
}
