//! Cross-module stack reconstruction from a vCPU register snapshot
//!
//! Starting from the registers captured at fault time, the walker repeatedly
//! asks the owning image's debug engine for the previous frame. A trace may
//! cross from the main executable into a shared dependency and back; it ends
//! at the frame cap, at the outermost frame, or at the first address no
//! loaded image owns. Partial traces are normal output for corrupted stacks
//! or unknown code, not errors.

use kvm_bindings::kvm_regs;

use crate::addrs::VirtAddr;
use crate::config::Config;
use crate::elf::ElfImage;
use crate::memory::Mmu;
use crate::regs::DwarfRegs;

/// Default cap on walked frames
pub const DEFAULT_MAX_FRAMES: usize = 256;

/// Walk the stack within a single image
///
/// Frames are recorded callee to caller. The walk stays inside the image:
/// it stops as soon as a recovered return address leaves the image's
/// `.text` range, when `max_frames` addresses were recorded, or when the
/// debug engine reports no further frame. An image without a `.text`
/// section yields only the faulting frame.
#[must_use]
pub fn unwind_image(
    image: &ElfImage,
    kregs: &kvm_regs,
    max_frames: usize,
    mmu: &mut dyn Mmu,
) -> Vec<VirtAddr> {
    let mut regs = DwarfRegs::from(kregs);
    let mut stacktrace = Vec::new();

    let text = image.section_range(".text").ok();

    loop {
        let addr = regs.return_address();
        stacktrace.push(VirtAddr(addr));

        if stacktrace.len() >= max_frames {
            break;
        }
        let Some(text) = &text else {
            break;
        };

        // Debug records hold link-time addresses; shift a relocated PIE
        // address back before stepping
        if image.is_pie() {
            regs.set_return_address(addr.wrapping_sub(image.load_addr().0));
        }

        match image.debug_info().next_frame(&mut regs, mmu) {
            Ok(true) => {}
            Ok(false) => break,
            Err(err) => {
                log::debug!("Unwinding stopped at {addr:#x}: {err}");
                break;
            }
        }

        let next = regs.return_address();
        if next < text.start.0 || next >= text.end.0 {
            break;
        }
    }

    stacktrace
}

/// A stack walker across a set of loaded images
///
/// At every step the first image whose `.text` range contains the current
/// return address owns the frame and its debug engine performs the step.
/// Code ranges of loaded images should not overlap; if they ever do, first
/// match wins.
#[derive(Debug)]
pub struct StackWalker<'a> {
    /// Images searched for frame ownership, in priority order
    images: Vec<&'a ElfImage>,

    /// Cap on walked frames
    max_frames: usize,
}

impl<'a> StackWalker<'a> {
    /// Create a walker over `images` with the default frame cap
    #[must_use]
    pub fn new(images: Vec<&'a ElfImage>) -> Self {
        Self {
            images,
            max_frames: DEFAULT_MAX_FRAMES,
        }
    }

    /// Replace the frame cap
    #[must_use]
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    /// Apply the unwinding settings from `config`
    #[must_use]
    pub fn with_config(self, config: &Config) -> Self {
        self.with_max_frames(config.unwind.max_frames)
    }

    /// First image whose `.text` range contains `addr`
    fn image_with_addr_in_text(&self, addr: u64) -> Option<&'a ElfImage> {
        self.images.iter().copied().find(|image| {
            image
                .section_range(".text")
                .map_or(false, |range| addr >= range.start.0 && addr < range.end.0)
        })
    }

    /// Walk the stack across all images, tagging each frame with its owner
    ///
    /// Stops at the frame cap, at the outermost frame, or at the first
    /// address no image owns.
    #[must_use]
    pub fn unwind(&self, kregs: &kvm_regs, mmu: &mut dyn Mmu) -> Vec<(VirtAddr, &'a ElfImage)> {
        let mut regs = DwarfRegs::from(kregs);
        let mut stacktrace = Vec::new();

        while stacktrace.len() < self.max_frames {
            let addr = regs.return_address();

            // An address owned by nobody ends the walk with a partial trace
            let Some(image) = self.image_with_addr_in_text(addr) else {
                break;
            };

            stacktrace.push((VirtAddr(addr), image));

            if image.is_pie() {
                regs.set_return_address(addr.wrapping_sub(image.load_addr().0));
            }

            match image.debug_info().next_frame(&mut regs, mmu) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) => {
                    log::debug!("Unwinding stopped at {addr:#x}: {err}");
                    break;
                }
            }
        }

        stacktrace
    }
}
