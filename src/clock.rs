//! Millisecond/microsecond timebase driven by the 1 kHz SysTick interrupt.
//!
//! SysTick reloads every millisecond and counts core-clock cycles down to
//! zero; the exception handler bumps a millisecond counter at each reload.
//! [`micros`] combines the two: whole milliseconds from the counter, the
//! sub-millisecond remainder from the live countdown register.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SYST;
use embedded_hal::blocking::delay::{DelayMs, DelayUs};
use groundhog::RollingTimer;

use crate::consts::HSE_HZ;
use crate::pac;

/// Core-clock cycles per microsecond, fixed once the clock tree is final.
static CYCLES_PER_US: AtomicU32 = AtomicU32::new(0);

/// Uptime in milliseconds. Written only by the SysTick exception; wraps
/// after roughly 49 days.
static UPTIME_MS: AtomicU32 = AtomicU32::new(0);

const HSI_HZ: u32 = 8_000_000;

#[cfg(target_os = "none")]
#[cortex_m_rt::exception]
fn SysTick() {
    UPTIME_MS.fetch_add(1, Ordering::Relaxed);
}

/// Latch the scale factor and start the 1 kHz tick. Called at the end of
/// `init()`, once the clock configuration is final.
pub(crate) fn start(syst: &mut SYST, hclk: u32) {
    CYCLES_PER_US.store(hclk / 1_000_000, Ordering::Relaxed);

    syst.set_clock_source(SystClkSource::Core);
    syst.set_reload(hclk / 1_000 - 1);
    syst.clear_current();
    syst.enable_interrupt();
    syst.enable_counter();

    ksys_log!(info, "timebase: {=u32} cycles/us", hclk / 1_000_000);
}

/// System uptime in milliseconds. A single word read, safe from any context.
pub fn millis() -> u32 {
    UPTIME_MS.load(Ordering::Relaxed)
}

/// System uptime in microseconds (rolls over with the millisecond counter,
/// after ~49 days). Returns 0 until the timebase has been started.
///
/// The millisecond counter and the countdown register cannot be read in one
/// shot, so the counter is read on both sides of the countdown read and the
/// sample is retried whenever a tick landed in between. A sample can only
/// fail twice in a row if the tick period were shorter than three register
/// reads, so the loop is effectively bounded.
pub fn micros() -> u64 {
    let scale = CYCLES_PER_US.load(Ordering::Relaxed);
    if scale == 0 {
        return 0;
    }

    let (ms, countdown) = coherent_sample(
        || UPTIME_MS.load(Ordering::SeqCst),
        SYST::get_current,
    );
    elapsed_micros(ms, countdown, scale)
}

/// Spin until at least `us` microseconds have elapsed. Blocks the whole
/// core; there is no scheduler to yield to.
pub fn delay_us(us: u32) {
    let start = micros();
    while micros() < start + u64::from(us) {}
}

/// Spin for `ms` milliseconds, one millisecond at a time.
pub fn delay_ms(ms: u32) {
    for _ in 0..ms {
        delay_us(1_000);
    }
}

fn coherent_sample(
    mut read_ms: impl FnMut() -> u32,
    mut read_countdown: impl FnMut() -> u32,
) -> (u32, u32) {
    loop {
        let ms = read_ms();
        let countdown = read_countdown();
        if read_ms() == ms {
            return (ms, countdown);
        }
    }
}

fn elapsed_micros(ms: u32, countdown: u32, cycles_per_us: u32) -> u64 {
    let period = cycles_per_us * 1_000;
    u64::from(ms) * 1_000 + u64::from((period - countdown) / cycles_per_us)
}

/// Zero-sized handle over the system timebase, for drivers that want the
/// `groundhog` or `embedded-hal` timer traits instead of free functions.
pub struct Ticker;

impl Ticker {
    pub const fn new() -> Self {
        Self
    }
}

impl RollingTimer for Ticker {
    type Tick = u32;
    const TICKS_PER_SECOND: u32 = 1_000_000;

    fn get_ticks(&self) -> u32 {
        micros() as u32
    }
}

impl DelayUs<u32> for Ticker {
    fn delay_us(&mut self, us: u32) {
        delay_us(us);
    }
}

impl DelayMs<u32> for Ticker {
    fn delay_ms(&mut self, ms: u32) {
        delay_ms(ms);
    }
}

/// AHB clock frequency as currently configured, decoded from `RCC_CFGR`.
pub(crate) fn hclk_hz(rcc: &pac::rcc::RegisterBlock) -> u32 {
    let cfgr = rcc.cfgr.read();
    let sysclk = decode_sysclk(
        cfgr.sws().bits(),
        cfgr.pllmul().bits(),
        cfgr.pllsrc().bit_is_set(),
        cfgr.pllxtpre().bit_is_set(),
    );
    sysclk >> ahb_prescaler_shift(cfgr.hpre().bits())
}

fn decode_sysclk(sws: u8, pllmul: u8, pll_from_hse: bool, hse_div2: bool) -> u32 {
    match sws {
        0b01 => HSE_HZ,
        0b10 => {
            let input = if pll_from_hse {
                if hse_div2 {
                    HSE_HZ / 2
                } else {
                    HSE_HZ
                }
            } else {
                HSI_HZ / 2
            };
            // 0b0000 is x2, each step adds one; 0b1111 saturates at x16.
            let mul = (u32::from(pllmul) + 2).min(16);
            input * mul
        }
        _ => HSI_HZ,
    }
}

fn ahb_prescaler_shift(hpre: u8) -> u32 {
    // 0b1000..=0b1011 divide by 2..16; 0b1100..=0b1111 by 64..512 (no /32).
    match hpre {
        0b1000..=0b1011 => u32::from(hpre) - 0b0111,
        0b1100..=0b1111 => u32::from(hpre) - 0b0110,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    #[test]
    fn tick_handler_counts_and_wraps() {
        // The only test that touches the process-wide counter.
        UPTIME_MS.store(0, Ordering::SeqCst);
        for _ in 0..5 {
            UPTIME_MS.fetch_add(1, Ordering::Relaxed);
        }
        assert_eq!(millis(), 5);

        UPTIME_MS.store(u32::MAX, Ordering::SeqCst);
        UPTIME_MS.fetch_add(1, Ordering::Relaxed);
        assert_eq!(millis(), 0);
    }

    #[test]
    fn elapsed_micros_monotonic_within_tick() {
        // 72 MHz core clock: the countdown runs 71_999 -> 0 inside a tick.
        let mut last = 0;
        for countdown in (0..=71_999u32).rev().step_by(997) {
            let now = elapsed_micros(10, countdown, 72);
            assert!(now >= last, "{} < {}", now, last);
            last = now;
        }
        // The next tick window continues where this one left off.
        assert!(elapsed_micros(11, 71_999, 72) >= last);
    }

    #[test]
    fn elapsed_micros_spans_full_window() {
        assert_eq!(elapsed_micros(0, 71_999, 72), 0);
        assert_eq!(elapsed_micros(0, 36_000, 72), 500);
        assert_eq!(elapsed_micros(0, 0, 72), 1_000);
        assert_eq!(elapsed_micros(2, 36_000, 72), 2_500);
    }

    #[test]
    fn coherent_sample_rejects_torn_read() {
        // Inject a tick between the first counter read and the countdown
        // read. The torn pair (old ms, reloaded countdown) must be thrown
        // away and the retry must return the post-tick pair.
        let ms = Cell::new(41u32);
        let ms_reads = Cell::new(0u32);
        let ticked = Cell::new(false);

        let sample = coherent_sample(
            || {
                ms_reads.set(ms_reads.get() + 1);
                ms.get()
            },
            || {
                if !ticked.get() {
                    // Tick: counter reloads, millisecond count advances.
                    ticked.set(true);
                    ms.set(42);
                    71_950
                } else {
                    71_900
                }
            },
        );

        assert_eq!(sample, (42, 71_900));
        // Two counter reads per attempt, and the first attempt was rejected.
        assert_eq!(ms_reads.get(), 4);
    }

    #[test]
    fn coherent_sample_passes_quiet_window() {
        let sample = coherent_sample(|| 7, || 123);
        assert_eq!(sample, (7, 123));
    }

    #[test]
    fn sysclk_decode() {
        let cases = [
            // (sws, pllmul, pll from hse, hse /2, expected)
            (0b00, 0b0000, false, false, 8_000_000),  // HSI
            (0b01, 0b0000, false, false, 8_000_000),  // HSE crystal
            (0b10, 0b0111, true, false, 72_000_000),  // HSE x9
            (0b10, 0b1111, true, false, 128_000_000), // multiplier saturates at x16
            (0b10, 0b0110, true, true, 32_000_000),   // HSE/2 x8
            (0b10, 0b1110, false, false, 64_000_000), // HSI/2 x16
        ];

        for (sws, pllmul, from_hse, div2, expected) in cases {
            assert_eq!(
                decode_sysclk(sws, pllmul, from_hse, div2),
                expected,
                "sws={:#b} pllmul={:#b}",
                sws,
                pllmul
            );
        }
    }

    #[test]
    fn ahb_prescaler_table() {
        let cases = [
            (0b0000u8, 0u32), // not divided
            (0b0111, 0),      // still not divided
            (0b1000, 1),      // /2
            (0b1011, 4),      // /16
            (0b1100, 6),      // /64 (the table skips /32)
            (0b1111, 9),      // /512
        ];

        for (hpre, shift) in cases {
            assert_eq!(ahb_prescaler_shift(hpre), shift, "hpre={:#b}", hpre);
        }
    }
}
