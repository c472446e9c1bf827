#![no_main]

use libfuzzer_sys::fuzz_target;
use txalloc::alloc::codec::{decode_free_page, read_free_list};
use txalloc::alloc::meta_page::read_meta_page;
use txalloc::{AllocError, PageId, Result};

const PAGE_SIZE: u32 = 128;

// Treats the input as a run of 128-byte pages and walks the freelist chain
// rooted at page 2. Decoding must fail cleanly, never panic or loop.
fuzz_target!(|data: &[u8]| {
    let page = PAGE_SIZE as usize;
    if data.len() < page {
        return;
    }
    let _ = decode_free_page(&data[..page], PAGE_SIZE, PageId(2));
    let _ = read_meta_page(&data[..page], PageId(0));

    let source = |id: PageId, buf: &mut [u8]| -> Result<()> {
        let start = (id.0 as usize).checked_mul(page).ok_or(AllocError::Invalid("offset"))?;
        let end = start.checked_add(page).ok_or(AllocError::Invalid("offset"))?;
        let chunk = data
            .get(start..end)
            .ok_or(AllocError::Corruption("page past input"))?;
        buf.copy_from_slice(chunk);
        Ok(())
    };
    for entry in read_free_list(&source, PageId(2), PAGE_SIZE) {
        if entry.is_err() {
            break;
        }
    }
});
