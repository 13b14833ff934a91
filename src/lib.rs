#![cfg_attr(not(test), no_std)]

//! System bring-up and timekeeping for the Kestrel STM32F103 flight board.
//!
//! Call [`init`] exactly once at startup, before anything else touches the
//! peripherals. It sequences interrupt priority grouping, peripheral clock
//! gating, pin defaults, the indicator pins, and the 1 kHz SysTick
//! timebase; after that the time queries, delays and reset paths are
//! usable from any context.
//!
//! ```ignore
//! #[cortex_m_rt::entry]
//! fn main() -> ! {
//!     let cp = cortex_m::Peripherals::take().unwrap();
//!     let dp = kestrel_system::pac::Peripherals::take().unwrap();
//!     kestrel_system::init(cp, dp);
//!
//!     loop {
//!         kestrel_system::system::led0_on();
//!         kestrel_system::delay_ms(500);
//!         kestrel_system::system::led0_off();
//!         kestrel_system::delay_ms(500);
//!     }
//! }
//! ```

pub use stm32f1::stm32f103 as pac;

#[macro_use]
pub mod log;

pub mod clock;
pub mod consts;
pub mod gpio;
pub mod reset;
pub mod system;

pub use clock::{delay_ms, delay_us, micros, millis, Ticker};
pub use reset::{failure_mode, read_backup_register, system_reset, write_backup_register};
pub use system::init;

#[cfg(all(feature = "panic-reset", target_os = "none"))]
use panic_reset as _;

#[cfg(all(feature = "defmt-log", target_os = "none"))]
mod defmt_impl {
    use defmt_rtt as _; // global logger
    use panic_probe as _;

    // same panicking *behavior* as `panic-probe` but doesn't print a panic message
    // this prevents the panic message being printed *twice* when `defmt::panic` is invoked
    #[defmt::panic_handler]
    fn panic() -> ! {
        cortex_m::asm::udf()
    }

    defmt::timestamp!("{=u32}", crate::clock::millis());
}
