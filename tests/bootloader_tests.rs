//! Packet-level tests of the ISP bootloader running on a simulated N76E003.

use std::sync::Arc;
use std::thread;

use nuvoprog::bootloader::{Bootloader, BootloaderConfig, Fault, IsrShared, State, Step};
use nuvoprog::constants::{PACKET_SIZE, UPDATE_FIRST_DATA_SIZE};
use nuvoprog::packet::{self, Packet};
use nuvoprog::sim::{FlashMemory, SimulatedChip};
use nuvoprog::Command;

const APROM_SIZE: usize = 16 * 1024;

fn boot_with(chip: SimulatedChip, config: BootloaderConfig) -> Bootloader<SimulatedChip> {
    let mut bl = Bootloader::new(chip, config);
    bl.start();
    bl
}

fn boot() -> Bootloader<SimulatedChip> {
    boot_with(SimulatedChip::default(), BootloaderConfig::default())
}

/// Feed one raw packet through the receive interrupt and run the main loop once.
fn send_raw(bl: &mut Bootloader<SimulatedChip>, raw: &Packet) -> (Step, Option<Packet>) {
    for &b in raw.iter() {
        bl.on_uart_rx(b);
    }
    let step = bl.poll();
    let reply = bl
        .platform_mut()
        .take_packet(PACKET_SIZE)
        .map(|v| <Packet>::try_from(v.as_slice()).unwrap());
    (step, reply)
}

fn send(bl: &mut Bootloader<SimulatedChip>, cmd: Command, seq: u16) -> (Packet, Option<Packet>) {
    let raw = cmd.into_raw(seq).unwrap();
    let (_, reply) = send_raw(bl, &raw);
    (raw, reply)
}

fn connected() -> Bootloader<SimulatedChip> {
    let mut bl = boot();
    let (_, reply) = send(&mut bl, Command::Connect, 0);
    assert!(reply.is_some());
    bl
}

fn is_ack(req: &Packet, reply: &Packet) -> bool {
    packet::reply_checksum(reply) == packet::checksum(req)
}

fn is_nack(req: &Packet, reply: &Packet) -> bool {
    packet::reply_checksum(reply) == !packet::checksum(req)
}

// =============================================================================
// Connection
// =============================================================================

#[test]
fn test_connect_replies_with_sequence_one() {
    let mut bl = boot();
    assert_eq!(bl.state(), State::Disconnected);

    let (req, reply) = send(&mut bl, Command::Connect, 0);
    let reply = reply.expect("CONNECT must be answered");
    assert!(is_ack(&req, &reply));
    assert_eq!(packet::reply_checksum(&reply), 0x00ae);
    assert_eq!(packet::sequence(&reply), 1);
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_commands_before_connect_are_dropped() {
    let mut bl = boot();
    let (_, reply) = send(&mut bl, Command::GetFwVersion, 1);
    assert!(reply.is_none());
    assert_eq!(bl.state(), State::Disconnected);
    assert_eq!(bl.platform().tx_pending(), 0);
}

#[test]
fn test_connect_with_garbage_command_word_is_dropped() {
    let mut bl = boot();
    let mut raw = Command::Connect.into_raw(0).unwrap();
    raw[2] = 0x55;
    let (_, reply) = send_raw(&mut bl, &raw);
    assert!(reply.is_none());
    assert_eq!(bl.state(), State::Disconnected);
}

#[test]
fn test_sync_seq_adopts_host_number() {
    let mut bl = connected();
    let (req, reply) = send(&mut bl, Command::SyncSeq { seq: 100 }, 100);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    assert_eq!(packet::sequence(&reply), 101);
}

#[test]
fn test_sequence_advances_once_per_reply() {
    let mut bl = connected();
    for n in 0..10u16 {
        let (_, reply) = send(&mut bl, Command::GetDeviceId, 0);
        assert_eq!(packet::sequence(&reply.unwrap()), 2 + n);
    }
    assert_eq!(bl.sequence(), 11);
}

#[test]
fn test_get_fw_version_is_idempotent() {
    let mut bl = connected();
    let snapshot = bl.platform().memory.clone();
    for seq in 2..6 {
        let (req, reply) = send(&mut bl, Command::GetFwVersion, seq);
        let reply = reply.unwrap();
        assert!(is_ack(&req, &reply));
        assert_eq!(reply[8], 0xd0);
        assert!(reply[9..].iter().all(|&b| b == 0));
    }
    assert_eq!(bl.platform().memory, snapshot);
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_identity_commands() {
    let mut bl = connected();

    let (_, reply) = send(&mut bl, Command::GetDeviceId, 2);
    assert_eq!(&reply.unwrap()[8..10], &[0x50, 0x36]);

    let (_, reply) = send(&mut bl, Command::GetCid, 3);
    assert_eq!(reply.unwrap()[8], 0xda);

    let uid = bl.platform().memory.uid_area;
    let (_, reply) = send(&mut bl, Command::GetUid, 4);
    assert_eq!(&reply.unwrap()[8..20], &uid[..12]);

    // factory image boots from LDROM
    let (_, reply) = send(&mut bl, Command::GetFlashMode, 5);
    assert_eq!(reply.unwrap()[8], 2);
}

#[test]
fn test_unknown_command_is_nacked() {
    let mut bl = connected();
    let mut raw = [0u8; PACKET_SIZE];
    raw[0] = 0x77;
    let (step, reply) = send_raw(&mut bl, &raw);
    assert_eq!(step, Step::Handled);
    assert!(is_nack(&raw, &reply.unwrap()));
}

// =============================================================================
// Timers
// =============================================================================

#[test]
fn test_connect_timeout_boots_aprom() {
    let mut bl = boot();
    // HIRC pulled down for 115200 baud while in ISP
    assert_eq!(bl.platform().rctrim(), [0x8c - 7, 0x01]);

    for _ in 0..199 {
        bl.on_timer_tick();
    }
    assert_eq!(bl.poll(), Step::Idle);
    bl.on_timer_tick();
    assert_eq!(bl.poll(), Step::BootAprom);

    bl.boot_aprom();
    assert_eq!(bl.platform().rctrim(), [0x8c, 0x01]);
    assert!(bl.platform().reset_to_aprom());
    assert_eq!(bl.platform().violations(), 0);
}

#[test]
fn test_connect_disarms_timeout() {
    let mut bl = connected();
    for _ in 0..1000 {
        bl.on_timer_tick();
    }
    assert_eq!(bl.poll(), Step::Idle);
    assert!(!bl.platform().reset_to_aprom());
}

#[test]
fn test_idle_line_drops_partial_packet() {
    let mut bl = connected();
    for b in [0xa6, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06] {
        bl.on_uart_rx(b);
    }
    for _ in 0..90 {
        bl.on_timer_tick();
    }
    assert_eq!(bl.poll(), Step::Idle);

    let (req, reply) = send(&mut bl, Command::GetFwVersion, 2);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    assert_eq!(reply[8], 0xd0);
}

// =============================================================================
// Flash commands
// =============================================================================

#[test]
fn test_update_aprom_programs_and_sums() {
    let mut bl = connected();
    let data: Vec<u8> = (0..UPDATE_FIRST_DATA_SIZE as u8).collect();
    let cmd = Command::UpdateAprom {
        address: 0x200,
        len: data.len() as u16,
        data: data.clone(),
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));

    let sum: u16 = data.iter().map(|&b| u16::from(b)).sum();
    assert_eq!(u16::from_le_bytes([reply[8], reply[9]]), sum);
    assert_eq!(&bl.platform().memory.flash[0x200..0x230], &data[..]);
    assert_eq!(bl.platform().erased_pages(), &[0x200]);
    assert_eq!(bl.state(), State::Command);
    assert_eq!(bl.platform().violations(), 0);
}

#[test]
fn test_update_aprom_continuation_crosses_pages() {
    let mut bl = connected();
    let data: Vec<u8> = (0..100u8).map(|b| b ^ 0x5a).collect();
    let cmd = Command::UpdateAprom {
        address: 0x70,
        len: data.len() as u16,
        data: data[..48].to_vec(),
    };
    let (_, reply) = send(&mut bl, cmd, 2);
    assert!(reply.is_some());
    assert_eq!(bl.state(), State::Updating);

    let (req, reply) = send(
        &mut bl,
        Command::Continuation {
            data: data[48..].to_vec(),
        },
        3,
    );
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    let sum = data.iter().fold(0u16, |a, &b| a.wrapping_add(u16::from(b)));
    assert_eq!(u16::from_le_bytes([reply[8], reply[9]]), sum);
    assert_eq!(&bl.platform().memory.flash[0x70..0x70 + 100], &data[..]);
    assert_eq!(bl.platform().erased_pages(), &[0x00, 0x80]);
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_update_aprom_past_end_is_nacked() {
    let mut bl = connected();
    let before = bl.platform().memory.clone();
    let cmd = Command::UpdateAprom {
        address: (APROM_SIZE - 1) as u16,
        len: 2,
        data: vec![0x12, 0x34],
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    assert!(is_nack(&req, &reply.unwrap()));
    assert!(bl.platform().erased_pages().is_empty());
    assert_eq!(bl.platform().memory, before);
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_update_aprom_zero_length_is_nacked() {
    let mut bl = connected();
    let cmd = Command::UpdateAprom {
        address: 0,
        len: 0,
        data: vec![],
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    assert!(is_nack(&req, &reply.unwrap()));
    assert!(bl.platform().erased_pages().is_empty());
}

#[test]
fn test_verify_failure_halts_forever() {
    let chip = SimulatedChip::default().with_bad_cell(5);
    let mut bl = boot_with(chip, BootloaderConfig::default());
    send(&mut bl, Command::Connect, 0);

    let data = vec![0x00u8; 10];
    let cmd = Command::UpdateAprom {
        address: 0,
        len: 10,
        data,
    };
    let (_, reply) = send(&mut bl, cmd, 2);
    assert!(reply.is_none());
    assert_eq!(
        bl.fault(),
        Some(Fault {
            address: 5,
            expected: 0x00,
            actual: 0xff,
        })
    );
    assert!(!bl.platform().interrupts_enabled());

    // nothing is serviced any more, not even CONNECT
    let (_, reply) = send(&mut bl, Command::Connect, 0);
    assert!(reply.is_none());
    for _ in 0..1000 {
        bl.on_timer_tick();
    }
    assert_eq!(bl.poll(), Step::Halted);
}

#[test]
fn test_read_rom_crosses_into_ldrom() {
    let mut chip = SimulatedChip::default();
    let image: Vec<u8> = (0..(18 * 1024)).map(|i| (i * 7 + 3) as u8).collect();
    chip.memory.load(0, &image);
    let mut bl = boot_with(chip, BootloaderConfig::default());
    send(&mut bl, Command::Connect, 0);

    let start = APROM_SIZE - 28;
    let cmd = Command::ReadRom {
        address: start as u16,
        len: 56,
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    assert_eq!(&reply[8..], &image[start..start + 56]);
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_read_rom_past_flash_end_is_nacked() {
    let mut bl = connected();
    let cmd = Command::ReadRom {
        address: (18 * 1024 - 10) as u16,
        len: 11,
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    assert!(is_nack(&req, &reply.unwrap()));
    assert_eq!(bl.state(), State::Command);
}

#[test]
fn test_dump_rom_continues_until_flash_end() {
    let mut bl = connected();
    let (_, reply) = send(&mut bl, Command::DumpRom, 2);
    assert!(reply.is_some());
    assert_eq!(bl.state(), State::Dumping);

    let mut packets = 1;
    let mut seq = 3;
    while bl.state() == State::Dumping {
        let (_, reply) = send(&mut bl, Command::Continuation { data: vec![] }, seq);
        assert!(reply.is_some());
        packets += 1;
        seq += 1;
    }
    assert_eq!(packets, (18 * 1024usize).div_ceil(56));
}

#[test]
fn test_erase_all_blanks_aprom_only() {
    let mut chip = SimulatedChip::default();
    chip.memory.load(0, &[0u8; 18 * 1024]);
    let mut bl = boot_with(chip, BootloaderConfig::default());
    send(&mut bl, Command::Connect, 0);

    let (req, reply) = send(&mut bl, Command::EraseAll, 2);
    assert!(is_ack(&req, &reply.unwrap()));
    let memory = &bl.platform().memory;
    assert!(memory.aprom().iter().all(|&b| b == 0xff));
    assert!(memory.ldrom().iter().all(|&b| b == 0x00));
    assert_eq!(bl.platform().erased_pages().len(), APROM_SIZE / 128);
}

#[test]
fn test_page_erase_clears_containing_page() {
    let mut chip = SimulatedChip::default();
    chip.memory.load(0x100, &[0u8; 0x100]);
    let mut bl = boot_with(chip, BootloaderConfig::default());
    send(&mut bl, Command::Connect, 0);

    let (req, reply) = send(&mut bl, Command::PageErase { address: 0x105 }, 2);
    assert!(is_ack(&req, &reply.unwrap()));
    let flash = &bl.platform().memory.flash;
    assert!(flash[0x100..0x180].iter().all(|&b| b == 0xff));
    assert!(flash[0x180..0x200].iter().all(|&b| b == 0x00));
    assert_eq!(bl.platform().erased_pages(), &[0x100]);
}

#[test]
fn test_page_erase_in_ldrom_is_nacked() {
    let mut bl = connected();
    let cmd = Command::PageErase {
        address: APROM_SIZE as u16,
    };
    let (req, reply) = send(&mut bl, cmd, 2);
    assert!(is_nack(&req, &reply.unwrap()));
    assert!(bl.platform().erased_pages().is_empty());
}

#[test]
fn test_update_config_rewrites_sector() {
    let mut bl = connected();
    let config = [0x7f, 0xfd, 0xff, 0xff, 0xff];
    let (req, reply) = send(&mut bl, Command::UpdateConfig { config }, 2);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    assert_eq!(&reply[8..13], &config);
    assert_eq!(&reply[13..16], &[0xff; 3]);
    assert_eq!(bl.platform().memory.config, config);
    assert_eq!(bl.platform().violations(), 0);
}

#[test]
fn test_run_aprom_has_no_reply() {
    let mut bl = connected();
    let raw = Command::RunAprom.into_raw(2).unwrap();
    let (step, reply) = send_raw(&mut bl, &raw);
    assert_eq!(step, Step::BootAprom);
    assert!(reply.is_none());
}

// =============================================================================
// Sequence checking
// =============================================================================

fn checked() -> Bootloader<SimulatedChip> {
    let config = BootloaderConfig {
        check_sequence: true,
        ..BootloaderConfig::default()
    };
    let mut bl = boot_with(SimulatedChip::default(), config);
    send(&mut bl, Command::Connect, 0);
    bl
}

#[test]
fn test_out_of_order_packet_is_not_dispatched() {
    let mut bl = checked();
    let (req, reply) = send(&mut bl, Command::GetFwVersion, 5);
    let reply = reply.unwrap();
    assert!(is_ack(&req, &reply));
    assert_eq!(packet::sequence(&reply), 2);
    assert_eq!(reply[8], 0);

    let (_, reply) = send(&mut bl, Command::GetFwVersion, 3);
    let reply = reply.unwrap();
    assert_eq!(packet::sequence(&reply), 3);
    assert_eq!(reply[8], 0xd0);
}

#[test]
fn test_sync_seq_with_mismatched_echo_resets_counter() {
    let mut bl = checked();
    let mut raw = Command::SyncSeq { seq: 40 }.into_raw(40).unwrap();
    raw[8] = 41;
    let (_, reply) = send_raw(&mut bl, &raw);
    assert_eq!(packet::sequence(&reply.unwrap()), 0);

    let (_, reply) = send(&mut bl, Command::GetFwVersion, 1);
    assert_eq!(reply.unwrap()[8], 0xd0);
}

#[test]
fn test_watchdog_is_kicked_while_busy() {
    let config = BootloaderConfig {
        watchdog: true,
        ..BootloaderConfig::default()
    };
    let mut bl = boot_with(SimulatedChip::new(FlashMemory::n76e003()), config);
    assert!(bl.platform().watchdog_enabled());
    let kicks = bl.platform().watchdog_kicks();
    send(&mut bl, Command::Connect, 0);
    assert!(bl.platform().watchdog_kicks() >= kicks + PACKET_SIZE);
}

// =============================================================================
// Interrupt context
// =============================================================================

#[test]
fn test_uart_interrupt_reaches_polling_main_loop() {
    static SHARED: IsrShared = IsrShared::new();
    let mut bl = Bootloader::with_shared(
        SimulatedChip::default(),
        BootloaderConfig::default(),
        &SHARED,
    );
    bl.start();

    let raw = Command::Connect.into_raw(0).unwrap();
    let uart = thread::spawn(move || {
        for &b in raw.iter() {
            SHARED.on_uart_rx(b);
        }
    });
    let mut step = bl.poll();
    while step == Step::Idle {
        step = bl.poll();
    }
    uart.join().unwrap();

    assert_eq!(step, Step::Handled);
    let reply = bl.platform_mut().take_packet(PACKET_SIZE).unwrap();
    let reply = <Packet>::try_from(reply.as_slice()).unwrap();
    assert!(is_ack(&raw, &reply));
    assert_eq!(packet::sequence(&reply), 1);
    assert_eq!(SHARED.state(), State::Command);
    assert!(!SHARED.is_counting_down());
}

#[test]
fn test_timer_interrupt_expires_connect_window() {
    let shared = Arc::new(IsrShared::new());
    let mut bl = Bootloader::with_shared(
        SimulatedChip::default(),
        BootloaderConfig::default(),
        Arc::clone(&shared),
    );
    bl.start();
    assert!(shared.is_counting_down());

    let timer = {
        let shared = Arc::clone(&shared);
        thread::spawn(move || {
            for _ in 0..200 {
                shared.on_timer_tick();
            }
        })
    };
    let mut step = bl.poll();
    while step == Step::Idle {
        step = bl.poll();
    }
    timer.join().unwrap();

    assert_eq!(step, Step::BootAprom);
    assert!(!shared.is_counting_down());
}

#[test]
#[should_panic(expected = "simulated CPU trapped")]
fn test_run_boots_aprom_when_no_host_connects() {
    static SHARED: IsrShared = IsrShared::new();
    thread::spawn(|| {
        while !SHARED.is_counting_down() {
            thread::yield_now();
        }
        for _ in 0..200 {
            SHARED.on_timer_tick();
        }
    });
    Bootloader::with_shared(
        SimulatedChip::default(),
        BootloaderConfig::default(),
        &SHARED,
    )
    .run();
}
