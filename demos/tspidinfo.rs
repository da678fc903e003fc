//! Parses a transport stream and prints per-PID packet/continuity/scrambling counts plus a
//! best-effort role description derived from the PAT/PMT.
//!
//! Usage: `tspidinfo <file|->` (`-` reads the whole stream from stdin). Exit 0 on success.
//!
//! Role descriptions cover PAT, PMT, PCR, and PMT-declared stream types; CAT-driven ECM/EMM PIDs
//! are not reported since this crate's PSI decoding does not cover CAT (see [`isdb_stream::psi`]).

use isdb_stream::ts::{ContinuityTracker, MpegTsParser, PACKET_SIZE};
use isdb_stream::{Psi, PsiData, PsiDemux};
use std::collections::BTreeMap;
use std::env;
use std::fs::File;
use std::io::{self, Read};
use std::process::ExitCode;

#[derive(Default)]
struct PidStats {
    tracker: ContinuityTracker,
    role: Option<String>,
}

fn read_input(path: &str) -> io::Result<Vec<u8>> {
    if path == "-" {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut buf = Vec::with_capacity(len as usize);
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

/// Finds the next `0x47` sync byte at a stride of [`PACKET_SIZE`] starting from `start`, the way
/// a receiver resynchronizes after losing packet alignment.
fn resync(data: &[u8], start: usize) -> Option<usize> {
    (start..data.len()).find(|&i| {
        data[i] == 0x47
            && (i + PACKET_SIZE >= data.len() || data[i + PACKET_SIZE] == 0x47)
    })
}

fn main() -> ExitCode {
    pretty_env_logger::init();

    let mut args = env::args();
    let _program = args.next();
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: tspidinfo <file|->");
            return ExitCode::FAILURE;
        }
    };

    let data = match read_input(&path) {
        Ok(d) => d,
        Err(e) => {
            log::error!("failed to read {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let parser = MpegTsParser::new();
    let mut demux = PsiDemux::new();
    let mut pmt_pids: BTreeMap<u16, u16> = BTreeMap::new(); // pmt pid -> program num
    let mut pcr_pids: BTreeMap<u16, u16> = BTreeMap::new(); // pcr pid -> program num
    let mut stream_type_pids: BTreeMap<u16, (u16, u8)> = BTreeMap::new(); // es pid -> (program num, stream_type)
    let mut stats: BTreeMap<u16, PidStats> = BTreeMap::new();

    let mut pos = match resync(&data, 0) {
        Some(p) => p,
        None => {
            println!("no TS sync found");
            return ExitCode::SUCCESS;
        }
    };

    while pos + PACKET_SIZE <= data.len() {
        let packet: &[u8; PACKET_SIZE] = data[pos..pos + PACKET_SIZE].try_into().unwrap();
        match parser.parse(packet) {
            Ok(parsed) => {
                if parsed.is_null() {
                    pos += PACKET_SIZE;
                    continue;
                }
                let pid = parsed.pid();
                let entry = stats.entry(pid).or_default();
                entry.tracker.observe(&parsed.header);

                if demux.is_psi_pid(pid) {
                    if let Some(payload) = parsed.payload {
                        if let Ok(Some(psi)) = demux.feed(pid, parsed.header.pusi(), payload) {
                            record_psi(&psi, pid, &mut pmt_pids, &mut pcr_pids, &mut stream_type_pids);
                        }
                    }
                }
                pos += PACKET_SIZE;
            }
            Err(e) => {
                log::warn!("resynchronizing after {} at offset {}", e, pos);
                pos = match resync(&data, pos + 1) {
                    Some(p) => p,
                    None => break,
                };
            }
        }
    }

    for (&pid, stats) in stats.iter_mut() {
        stats.role = describe_pid(pid, &pmt_pids, &pcr_pids, &stream_type_pids);
    }

    for (pid, stats) in &stats {
        println!(
            "PID 0x{:04X}: input={} cc_errors={} scrambled={} role={}",
            pid,
            stats.tracker.input_count(),
            stats.tracker.error_count(),
            stats.tracker.scrambled_count(),
            stats.role.as_deref().unwrap_or("unknown")
        );
    }

    ExitCode::SUCCESS
}

fn record_psi(
    psi: &Psi,
    pid: u16,
    pmt_pids: &mut BTreeMap<u16, u16>,
    pcr_pids: &mut BTreeMap<u16, u16>,
    stream_type_pids: &mut BTreeMap<u16, (u16, u8)>,
) {
    match &psi.data {
        PsiData::Pat(entries) => {
            for entry in entries {
                if entry.program_num() != 0 {
                    pmt_pids.insert(entry.program_map_pid(), entry.program_num());
                }
            }
        }
        PsiData::Pmt(pmt) => {
            let program_num = psi
                .table_syntax
                .map(|ts| ts.table_id_extension())
                .unwrap_or(0);
            pcr_pids.insert(pmt.header.pcr_pid(), program_num);
            for es in &pmt.es_infos {
                stream_type_pids.insert(
                    es.header.elementary_pid(),
                    (program_num, es.header.stream_type()),
                );
            }
        }
        PsiData::Raw(_) => {
            let _ = pid;
        }
    }
}

fn describe_pid(
    pid: u16,
    pmt_pids: &BTreeMap<u16, u16>,
    pcr_pids: &BTreeMap<u16, u16>,
    stream_type_pids: &BTreeMap<u16, (u16, u8)>,
) -> Option<String> {
    if pid == 0 {
        return Some("PAT".to_string());
    }
    if let Some(program_num) = pmt_pids.get(&pid) {
        return Some(format!("PMT (program {})", program_num));
    }
    if let Some(program_num) = pcr_pids.get(&pid) {
        return Some(format!("PCR (program {})", program_num));
    }
    if let Some((program_num, stream_type)) = stream_type_pids.get(&pid) {
        return Some(format!(
            "stream type 0x{:02X} (program {})",
            stream_type, program_num
        ));
    }
    None
}
