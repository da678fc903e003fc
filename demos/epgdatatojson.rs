//! Reads an EPG data file and writes its contents to stdout as JSON.
//!
//! Usage: `epgdatatojson <file>`. Exits 0 on success, 1 if the file can't be opened or parsed.

use isdb_stream::epg::EpgDataFile;
use serde_json::json;
use std::env;
use std::process::ExitCode;

fn main() -> ExitCode {
    pretty_env_logger::init();

    let mut args = env::args();
    let _program = args.next();
    let path = match args.next() {
        Some(p) => p,
        None => {
            eprintln!("usage: epgdatatojson <file>");
            return ExitCode::FAILURE;
        }
    };

    let mut codec = EpgDataFile::new();
    let database = match codec.load_file(&path) {
        Ok(db) => db,
        Err(e) => {
            log::error!("failed to load {}: {}", path, e);
            return ExitCode::FAILURE;
        }
    };

    let service_list: Vec<_> = database
        .services
        .iter()
        .map(|service| {
            let event_list: Vec<_> = service
                .events
                .iter()
                .map(|event| {
                    let extended_text: Vec<_> = event
                        .extended_text
                        .iter()
                        .map(|item| json!({ "description": item.description, "text": item.text }))
                        .collect();
                    let video_list: Vec<_> = event
                        .video_list
                        .iter()
                        .map(|v| {
                            json!({
                                "streamContent": v.stream_content,
                                "componentType": v.component_type,
                                "componentTag": v.component_tag,
                                "text": v.text,
                            })
                        })
                        .collect();
                    let audio_list: Vec<_> = event
                        .audio_list
                        .iter()
                        .map(|a| {
                            json!({
                                "streamContent": a.stream_content,
                                "componentType": a.component_type,
                                "componentTag": a.component_tag,
                                "text": a.text,
                            })
                        })
                        .collect();
                    let content_nibble: Vec<_> = event
                        .content_nibbles
                        .iter()
                        .map(|n| {
                            json!({
                                "contentNibbleLevel1": n.content_nibble_level1,
                                "contentNibbleLevel2": n.content_nibble_level2,
                                "userNibble1": n.user_nibble1,
                                "userNibble2": n.user_nibble2,
                            })
                        })
                        .collect();
                    let event_group: Vec<_> = event
                        .event_groups
                        .iter()
                        .map(|g| {
                            json!({
                                "groupType": g.group_type,
                                "events": g.events.iter().map(|m| json!({
                                    "serviceId": m.service_id,
                                    "eventId": m.event_id,
                                    "networkId": m.network_id,
                                    "transportStreamId": m.transport_stream_id,
                                })).collect::<Vec<_>>(),
                            })
                        })
                        .collect();

                    let mut obj = json!({
                        "eventId": event.event_id,
                        "eventName": event.event_name,
                        "eventText": event.event_text,
                        "extendedText": extended_text,
                        "startTime": event.start_time.to_iso8601_jst(),
                        "duration": event.duration,
                        "freeCaMode": event.free_ca_mode,
                        "videoList": video_list,
                        "audioList": audio_list,
                        "contentNibble": content_nibble,
                        "eventGroup": event_group,
                    });
                    if let Some(common) = &event.common_event {
                        obj["commonServiceId"] = json!(common.service_id);
                        obj["commonEventId"] = json!(common.event_id);
                    }
                    obj
                })
                .collect();

            json!({
                "serviceId": service.key.service_id,
                "networkId": service.key.network_id,
                "transportStreamId": service.key.transport_stream_id,
                "eventList": event_list,
            })
        })
        .collect();

    let output = json!({ "serviceList": service_list });
    match serde_json::to_writer_pretty(std::io::stdout(), &output) {
        Ok(()) => {
            println!();
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("failed to write JSON: {}", e);
            ExitCode::FAILURE
        }
    }
}
