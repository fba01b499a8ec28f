//! Architecture-specific context switching
//!
//! Each architecture provides:
//! - `SavedRegs`: callee-saved register file of a suspended context
//! - `init_context`: prepare a fresh stack to start in an entry function
//! - `context_switch`: save the current context and resume another
//!
//! Only callee-saved state is switched. The switch is an ordinary function
//! call from the compiler's point of view, so caller-saved registers are
//! already spilled by the time it runs.

/// Entry point of a fresh fiber. Receives the argument passed to
/// `init_context` and never returns.
pub type EntryFn = extern "C" fn(usize) -> !;

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::{SavedRegs, init_context, context_switch};
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::{SavedRegs, init_context, context_switch};
    } else {
        compile_error!("Unsupported architecture");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::StackRegion;
    use lazyreq_core::id::SlotId;
    use std::cell::Cell;

    struct PingPong {
        main: SavedRegs,
        fiber: SavedRegs,
        hits: Cell<u32>,
    }

    extern "C" fn ping(arg: usize) -> ! {
        let pp = arg as *mut PingPong;
        unsafe {
            loop {
                (*pp).hits.set((*pp).hits.get() + 1);
                context_switch(&mut (*pp).fiber, &(*pp).main);
            }
        }
    }

    #[test]
    fn test_switch_round_trip() {
        let region = StackRegion::reserve(1, 64 * 1024).unwrap();
        let slot = SlotId::new(0);
        region.activate_slot(slot).unwrap();

        let mut pp = Box::new(PingPong {
            main: SavedRegs::default(),
            fiber: SavedRegs::default(),
            hits: Cell::new(0),
        });
        let arg = &mut *pp as *mut PingPong as usize;

        unsafe {
            init_context(&mut pp.fiber, region.stack_top(slot), ping, arg);
            for expected in 1..=3 {
                let p = arg as *mut PingPong;
                context_switch(&mut (*p).main, &(*p).fiber);
                assert_eq!((*p).hits.get(), expected);
            }
        }
    }

    #[test]
    fn test_float_state_survives_switch() {
        extern "C" fn spin(arg: usize) -> ! {
            let pp = arg as *mut PingPong;
            unsafe {
                loop {
                    let x = std::hint::black_box(1.5f64) * 2.0;
                    (*pp).hits.set(x as u32);
                    context_switch(&mut (*pp).fiber, &(*pp).main);
                }
            }
        }

        let region = StackRegion::reserve(1, 64 * 1024).unwrap();
        let slot = SlotId::new(0);
        region.activate_slot(slot).unwrap();

        let mut pp = Box::new(PingPong {
            main: SavedRegs::default(),
            fiber: SavedRegs::default(),
            hits: Cell::new(0),
        });
        let arg = &mut *pp as *mut PingPong as usize;
        let before = std::hint::black_box(0.25f64);
        unsafe {
            init_context(&mut pp.fiber, region.stack_top(slot), spin, arg);
            let p = arg as *mut PingPong;
            context_switch(&mut (*p).main, &(*p).fiber);
            assert_eq!((*p).hits.get(), 3);
        }
        assert_eq!(before * 4.0, 1.0);
    }
}
