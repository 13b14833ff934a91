//! One-shot board bring-up.
//!
//! `init` must run to completion before anything else touches the
//! peripherals it configures. Re-running it mid-flight would glitch pins
//! that are already in use.

use crate::clock;
use crate::consts::{INV_PIN, LED0_PIN, LED1_PIN};
use crate::gpio::{self, Mode, PinConfig, Speed, PIN_ALL};
use crate::pac;

// AIRCR: vendor key plus PRIGROUP for 2-bit preempt / 2-bit sub priorities.
const AIRCR_VECTKEY: u32 = 0x05FA_0000;
const PRIGROUP_2_2: u32 = 0b101 << 8;

// SWJ_CFG: keep SWD, release the JTAG-only pins (the LEDs live on PB3/PB4).
const SWJ_CFG_SWD_ONLY: u8 = 0b010;

/// Bring the board up: interrupt grouping, peripheral clocks, pin
/// defaults, indicator pins, and finally the 1 kHz timebase.
pub fn init(mut cp: cortex_m::Peripherals, dp: pac::Peripherals) {
    // Priority grouping first; interrupt config done later builds on it.
    unsafe { cp.SCB.aircr.write(AIRCR_VECTKEY | PRIGROUP_2_2) };

    // Clock gating for everything the firmware uses.
    let rcc = &dp.RCC;
    rcc.apb1enr
        .modify(|_, w| w.tim2en().set_bit().tim3en().set_bit().tim4en().set_bit());
    rcc.apb2enr.modify(|_, w| {
        w.afioen()
            .set_bit()
            .iopaen()
            .set_bit()
            .iopben()
            .set_bit()
            .iopcen()
            .set_bit()
            .tim1en()
            .set_bit()
            .adc1en()
            .set_bit()
            .usart1en()
            .set_bit()
    });
    rcc.ahbenr.modify(|_, w| w.dma1en().set_bit());

    // Forget whatever caused the last reset.
    rcc.csr.modify(|_, w| w.rmvf().set_bit());

    // Undriven pins float and burn power; park every pin as analog input.
    let park = PinConfig {
        pins: PIN_ALL,
        mode: Mode::AnalogInput,
        speed: Speed::S2MHz,
    };
    gpio::configure(&dp.GPIOA, &park);
    gpio::configure(&dp.GPIOB, &park);
    gpio::configure(&dp.GPIOC, &park);

    // Drop the pin mux to SWD-only so the LED pins stop being JTAG.
    dp.AFIO
        .mapr
        .modify(|_, w| unsafe { w.swj_cfg().bits(SWJ_CFG_SWD_ONLY) });

    led0_off();
    led1_off();

    let indicators: [(&pac::gpioa::RegisterBlock, PinConfig); 3] = [
        (
            &dp.GPIOB,
            PinConfig {
                pins: LED0_PIN,
                mode: Mode::OutputPushPull,
                speed: Speed::S2MHz,
            },
        ),
        (
            &dp.GPIOB,
            PinConfig {
                pins: LED1_PIN,
                mode: Mode::OutputPushPull,
                speed: Speed::S2MHz,
            },
        ),
        (
            &dp.GPIOB,
            PinConfig {
                pins: INV_PIN,
                mode: Mode::OutputPushPull,
                speed: Speed::S2MHz,
            },
        ),
    ];
    for (port, cfg) in indicators.iter() {
        gpio::configure(port, cfg);
    }

    // Timebase last: the scale factor comes from the final clock tree.
    let hclk = clock::hclk_hz(rcc);
    ksys_log!(info, "bring-up done, hclk {=u32} Hz", hclk);
    clock::start(&mut cp.SYST, hclk);
}

// The indicator LEDs are wired active low; the inverter line idles low.

pub fn led0_on() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.brr.write(|w| unsafe { w.bits(u32::from(LED0_PIN)) });
}

pub fn led0_off() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.bsrr.write(|w| unsafe { w.bits(u32::from(LED0_PIN)) });
}

pub fn led1_on() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.brr.write(|w| unsafe { w.bits(u32::from(LED1_PIN)) });
}

pub fn led1_off() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.bsrr.write(|w| unsafe { w.bits(u32::from(LED1_PIN)) });
}

/// Assert the serial-inverter control line.
pub fn inverter_on() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.bsrr.write(|w| unsafe { w.bits(u32::from(INV_PIN)) });
}

/// Release the serial-inverter control line.
pub fn inverter_off() {
    let gpiob = unsafe { &*pac::GPIOB::ptr() };
    gpiob.brr.write(|w| unsafe { w.bits(u32::from(INV_PIN)) });
}
