//! Soft reset through the backup domain, plus the terminal failure path.

use cortex_m::peripheral::SCB;

use crate::consts::{BOOTLOADER_FLAG, BOOTLOADER_FLAG_ADDR, SOFT_RESET_MAGIC};
use crate::pac;
use crate::system;

/// The 32-bit value persisted across resets in the backup data registers.
pub fn read_backup_register() -> u32 {
    let bkp = unsafe { &*pac::BKP::ptr() };
    bkp.dr[1].read().bits() | (bkp.dr[3].read().bits() << 16)
}

/// Store `value` in the backup data registers, surviving reset and (with
/// VBAT held) power loss. Enables the power/backup clocks and lifts the
/// backup-domain write protection first.
pub fn write_backup_register(value: u32) {
    let rcc = unsafe { &*pac::RCC::ptr() };
    let pwr = unsafe { &*pac::PWR::ptr() };
    let bkp = unsafe { &*pac::BKP::ptr() };

    rcc.apb1enr.modify(|_, w| w.pwren().set_bit().bkpen().set_bit());
    pwr.cr.modify(|_, w| w.dbp().set_bit());

    bkp.dr[1].write(|w| unsafe { w.bits(value & 0xFFFF) });
    bkp.dr[3].write(|w| unsafe { w.bits(value >> 16) });
}

/// Reset the chip. Does not return; execution resumes at the boot vector.
///
/// With `to_bootloader` set, a sentinel is left at the top of SRAM first;
/// the first-stage loader finds it there and stays resident instead of
/// jumping to the application. The reset is marked as software-requested
/// in the backup domain either way.
pub fn system_reset(to_bootloader: bool) -> ! {
    if to_bootloader {
        ksys_log!(info, "resetting into bootloader");
        unsafe { (BOOTLOADER_FLAG_ADDR as *mut u32).write_volatile(BOOTLOADER_FLAG) };
    } else {
        ksys_log!(info, "soft reset");
    }

    write_backup_register(SOFT_RESET_MAGIC);

    SCB::sys_reset()
}

/// Terminal failure indication: LED1 dark, LED0 lit, then a full reset.
pub fn failure_mode() -> ! {
    ksys_log!(error, "failure mode, resetting");

    system::led1_off();
    system::led0_on();
    system_reset(false)
}
