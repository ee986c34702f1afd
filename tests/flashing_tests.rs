//! The host ISP client driving the simulated bootloader end to end.

use nuvoprog::bootloader::{BootloaderConfig, State, Step};
use nuvoprog::flashing::FlashMode;
use nuvoprog::sim::{LoopbackTransport, SimulatedChip};
use nuvoprog::{ConfigFlags, Error, Flashing};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn flashing() -> Flashing<LoopbackTransport> {
    Flashing::new(LoopbackTransport::default()).unwrap()
}

fn flashing_with(chip: SimulatedChip) -> Flashing<LoopbackTransport> {
    Flashing::new(LoopbackTransport::new(chip, BootloaderConfig::default())).unwrap()
}

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.random()).collect()
}

// =============================================================================
// Session setup
// =============================================================================

#[test]
fn test_new_identifies_chip() {
    let f = flashing();
    assert_eq!(f.device_id(), 0x3650);
    assert_eq!(f.chip().name, "N76E003");
    assert_eq!(f.fw_version(), 0xd0);
    assert!(f.supports_extended());
    assert_eq!(f.aprom_size(), 16 * 1024);
    assert_eq!(f.transport().bootloader().state(), State::Command);
}

#[test]
fn test_new_fails_on_unknown_device() {
    let mut chip = SimulatedChip::default();
    chip.memory.ids[..2].copy_from_slice(&0x1234u16.to_le_bytes());
    let err = Flashing::new(LoopbackTransport::new(chip, BootloaderConfig::default()))
        .err()
        .unwrap();
    assert!(matches!(err, Error::DeviceMismatch { actual: 0x1234, .. }));
}

#[test]
fn test_host_follows_checked_sequence() {
    let config = BootloaderConfig {
        check_sequence: true,
        ..BootloaderConfig::default()
    };
    let transport = LoopbackTransport::new(SimulatedChip::default(), config);
    let mut f = Flashing::new(transport).unwrap();
    for _ in 0..5 {
        f.read_config().unwrap();
    }
    let data = random_bytes(7, 200);
    f.flash(0x400, &data, |_| ()).unwrap();
    f.verify(0x400, &data).unwrap();
}

#[test]
fn test_identity_reads() {
    let mut f = flashing();
    let uid = f.transport().chip().memory.uid_area;
    assert_eq!(f.read_uid().unwrap(), uid[..12].to_vec());
    assert_eq!(f.read_cid().unwrap(), 0xda);
    assert_eq!(f.read_ucid().unwrap().len(), 48);
    assert_eq!(f.flash_mode().unwrap(), FlashMode::Ldrom);
}

#[test]
fn test_old_firmware_rejects_extended_commands() {
    let config = BootloaderConfig {
        fw_version: 0x27,
        ..BootloaderConfig::default()
    };
    let mut f = Flashing::new(LoopbackTransport::new(SimulatedChip::default(), config)).unwrap();
    assert!(!f.supports_extended());
    assert!(matches!(f.read_uid(), Err(Error::Unsupported(_))));
    assert!(matches!(f.page_erase(0), Err(Error::Unsupported(_))));
}

// =============================================================================
// Programming
// =============================================================================

#[test]
fn test_flash_then_read_back() {
    let mut f = flashing();
    let data = random_bytes(1, 1000);
    let mut last = 0;
    f.flash(0x123, &data, |n| last = n).unwrap();
    assert_eq!(last, data.len());

    assert_eq!(f.read(0x123, data.len(), |_| ()).unwrap(), data);
    assert_eq!(&f.transport().chip().memory.flash[0x123..0x123 + 1000], &data[..]);
    assert_eq!(f.transport().chip().violations(), 0);
}

#[test]
fn test_flash_up_to_aprom_end() {
    let mut f = flashing();
    let data = random_bytes(2, 300);
    let address = 16 * 1024 - 300;
    f.flash(address, &data, |_| ()).unwrap();
    f.verify(address, &data).unwrap();
}

#[test]
fn test_flash_past_aprom_end_is_refused_locally() {
    let mut f = flashing();
    let err = f.flash(16 * 1024 - 1, &[1, 2], |_| ()).unwrap_err();
    assert!(matches!(err, Error::InvalidRange { .. }));
    assert!(f.transport().chip().erased_pages().is_empty());
}

#[test]
fn test_addresses_near_u32_max_are_refused() {
    let mut f = flashing();
    assert!(matches!(
        f.page_erase(u32::MAX),
        Err(Error::InvalidRange {
            start: u32::MAX,
            end: u32::MAX
        })
    ));
    assert!(matches!(
        f.flash(0xffff_fff0, &[0u8; 32], |_| ()),
        Err(Error::InvalidRange { .. })
    ));
    assert!(matches!(
        f.read(0xffff_ffff, 2, |_| ()),
        Err(Error::InvalidRange { .. })
    ));
    assert!(f.transport().chip().erased_pages().is_empty());
    // the session is still usable
    f.verify(0, &[0xff; 4]).unwrap();
}

#[test]
fn test_verify_reports_first_difference() {
    let mut f = flashing();
    f.flash(0, &[1, 2, 3, 4], |_| ()).unwrap();
    let err = f.verify(0, &[1, 2, 9, 4]).unwrap_err();
    assert!(matches!(
        err,
        Error::VerifyMismatch {
            address: 2,
            expected: 9,
            actual: 3
        }
    ));
}

#[test]
fn test_flash_fault_loses_the_device() {
    let mut f = flashing_with(SimulatedChip::default().with_bad_cell(0x10));
    let err = f.flash(0, &[0u8; 32], |_| ()).unwrap_err();
    assert!(matches!(err, Error::Framing(_)));
    assert!(f.transport().bootloader().fault().is_some());
}

#[test]
fn test_erase_all_and_page_erase() {
    let mut f = flashing();
    f.flash(0, &[0u8; 512], |_| ()).unwrap();

    f.page_erase(0x90).unwrap();
    let flash = &f.transport().chip().memory.flash;
    assert!(flash[0x80..0x100].iter().all(|&b| b == 0xff));
    assert!(flash[..0x80].iter().all(|&b| b == 0x00));

    f.erase_all().unwrap();
    assert!(f.transport().chip().memory.aprom().iter().all(|&b| b == 0xff));
}

#[test]
fn test_dump_covers_aprom_and_ldrom() {
    let mut chip = SimulatedChip::default();
    let image = random_bytes(3, 18 * 1024);
    chip.memory.load(0, &image);
    let mut f = flashing_with(chip);
    let mut progress = 0;
    let dump = f.dump(|n| progress = n).unwrap();
    assert_eq!(dump, image);
    assert_eq!(progress, image.len());
}

// =============================================================================
// CONFIG
// =============================================================================

#[test]
fn test_write_config_round_trip() {
    let mut f = flashing();
    let mut config = f.read_config().unwrap();
    assert!(!config.boots_from_aprom());
    assert_eq!(config.ldrom_size(), 2048);

    config.set_cbs(true);
    config.set_ldrom_size_kb(1);
    f.write_config(config).unwrap();
    assert_eq!(f.config(), config);
    assert_eq!(f.aprom_size(), 17 * 1024);
    assert_eq!(f.transport().chip().memory.config, config.encode());
}

#[test]
fn test_random_configs_survive_the_device() {
    let mut f = flashing();
    let mut rng = StdRng::seed_from_u64(0x4e76);
    for _ in 0..20 {
        let raw: [u8; 5] = rng.random();
        let config = ConfigFlags::decode(raw);
        f.write_config(config).unwrap();
        assert_eq!(f.read_config().unwrap().encode(), raw);
    }
}

// =============================================================================
// Leaving ISP
// =============================================================================

#[test]
fn test_reset_boots_aprom() {
    let mut f = flashing();
    f.reset().unwrap();
    assert_eq!(f.transport().last_step(), Step::BootAprom);
    let chip = f.transport().chip();
    assert!(chip.reset_to_aprom());
    assert_eq!(chip.rctrim(), [0x8c, 0x01]);
}

#[test]
fn test_run_ldrom_is_acknowledged() {
    let mut f = flashing();
    f.run_ldrom().unwrap();
    assert!(!f.transport().chip().reset_to_aprom());
}

#[test]
fn test_no_host_means_aprom_boot() {
    let mut transport = LoopbackTransport::default();
    assert_eq!(transport.tick(199), Step::Idle);
    assert_eq!(transport.tick(1), Step::BootAprom);
    assert_eq!(transport.last_step(), Step::BootAprom);
}

#[test]
fn test_connected_host_keeps_bootloader_alive() {
    let mut f = flashing();
    assert_eq!(f.transport_mut().tick(1000), Step::Idle);
    assert_eq!(f.read_config().unwrap(), f.config());
}
