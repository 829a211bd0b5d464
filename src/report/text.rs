//! Fixed-layout text reports
//!
//! Sizes of 1024 bytes and up are shown in KB, smaller non-zero sizes in B,
//! and zero sizes are left out. Sum lines are always in KB.

use super::{ProcessUsage, SurfaceSelector};
use crate::database::{Counter, CounterSet};
use crate::kinds::{ResourceKind, SurfaceType};
use std::fmt::Write;

/// `"N KB"` / `"N B"`, or `None` for zero
pub fn format_size(bytes: u64) -> Option<String> {
    if bytes >= 1024 {
        Some(format!("{} KB", bytes / 1024))
    } else if bytes > 0 {
        Some(format!("{} B", bytes))
    } else {
        None
    }
}

/// Per-surface usage of one process plus "Others" and "Sum" lines
pub fn render_process_usage(process_id: u32, counters: Option<&CounterSet>) -> String {
    let mut out = format!("GC memory usage details for pid {}\n", process_id);

    let counters = match counters {
        Some(counters) => counters,
        None => {
            let _ = writeln!(out, "  - pid {} does not exist ", process_id);
            return out;
        }
    };

    for surface in SurfaceType::ALL {
        if let Some(size) = format_size(counters.surface(surface).current_bytes) {
            let _ = writeln!(out, "  - {:<16} {} ", surface.name(), size);
        }
    }

    let current = |kind: ResourceKind| counters.kind(kind).map_or(0, |c| c.current_bytes);
    let video = current(ResourceKind::VideoMemory);
    let sum = video
        + current(ResourceKind::Contiguous)
        + current(ResourceKind::NonPaged)
        + current(ResourceKind::CommandBuffer)
        + current(ResourceKind::Context);

    let _ = writeln!(out, "  - {:<16} {} KB ", "Others", (sum - video) / 1024);
    let _ = writeln!(out, "  - {:<16} {} KB ", "Sum", sum / 1024);
    out
}

fn write_type_table(out: &mut String, sizes: &[u64; SurfaceType::COUNT]) {
    for surface in SurfaceType::ALL {
        if let Some(size) = format_size(sizes[surface.index()]) {
            let _ = writeln!(
                out,
                "-- type {:2}: {:<16}, size {} ",
                surface.index(),
                surface.name(),
                size
            );
        }
    }
    let sum: u64 = sizes.iter().sum();
    let _ = writeln!(out, "-- sum    :                   size {} KB ", sum / 1024);
}

fn render_pid_detail(out: &mut String, usage: &ProcessUsage) {
    let _ = writeln!(out, "VIDMEM detail for PID {} ", usage.process_id);
    write_type_table(out, &usage.video_memory_by_surface());
}

/// Video memory detail per process.
///
/// `None` lists every process; asking for an unknown process prints an
/// explicit notice.
pub fn render_usage_by_pid(usages: &[ProcessUsage], process_id: Option<u32>) -> String {
    let mut out = String::new();
    match process_id {
        None => usages.iter().for_each(|u| render_pid_detail(&mut out, u)),
        Some(pid) => match usages.iter().find(|u| u.process_id == pid) {
            Some(usage) => render_pid_detail(&mut out, usage),
            None => {
                let _ = writeln!(out, "No such process in memory record: {} ", pid);
            }
        },
    }
    out
}

fn render_single_type(out: &mut String, usages: &[ProcessUsage], surface: SurfaceType) {
    let _ = writeln!(
        out,
        "VIDMEM detail for Type {}, {} ",
        surface.index(),
        surface.name()
    );

    let mut sum = 0;
    for usage in usages {
        let size = usage.video_memory_by_surface()[surface.index()];
        if let Some(text) = format_size(size) {
            let _ = writeln!(out, "  -- pid {:<5}: size: {}", usage.process_id, text);
        }
        sum += size;
    }
    if sum > 0 {
        let _ = writeln!(out, "  -- sum      : size: {} KB ", sum / 1024);
    }
}

/// Video memory usage by surface type
pub fn render_usage_by_type(usages: &[ProcessUsage], selector: SurfaceSelector) -> String {
    let mut out = String::new();
    match selector {
        SurfaceSelector::Type(surface) => render_single_type(&mut out, usages, surface),
        SurfaceSelector::Sum => {
            out.push_str("VIDMEM detail for all types:\n");
            let mut sizes = [0u64; SurfaceType::COUNT];
            for usage in usages {
                for (total, size) in sizes.iter_mut().zip(usage.video_memory_by_surface()) {
                    *total += size;
                }
            }
            write_type_table(&mut out, &sizes);
        }
        SurfaceSelector::All => {
            for surface in SurfaceType::ALL {
                render_single_type(&mut out, usages, surface);
            }
        }
    }
    out
}

/// Table of every live process
pub fn render_process_list(usages: &[ProcessUsage]) -> String {
    let mut out = String::new();
    out.push_str("**************************\n");
    out.push_str("***  PROCESS DB DUMP   ***\n");
    out.push_str("**************************\n");
    let _ = writeln!(out, "{:<8}{}", "PID", "RECORDS");
    for usage in usages {
        let _ = writeln!(out, "{:<8}{}", usage.process_id, usage.records.len());
    }
    out
}

fn dump_counter(out: &mut String, counter: Counter, name: &str) {
    let _ = writeln!(out, "{}:", name);
    let _ = writeln!(out, "  Currently allocated : {:>10}", counter.current_bytes);
    let _ = writeln!(out, "  Maximum allocated   : {:>10}", counter.peak_bytes);
    let _ = writeln!(out, "  Total allocated     : {:>10}", counter.lifetime_bytes);
}

/// Current/maximum/total of the video memory counter and every surface type
pub fn render_counter_dump(process_id: u32, counters: &CounterSet) -> String {
    let mut out = format!("VidMem Usage (Process {}):\n", process_id);
    dump_counter(
        &mut out,
        counters.kind(ResourceKind::VideoMemory).unwrap_or_default(),
        "Total Video Memory",
    );
    for surface in SurfaceType::ALL {
        let name = match surface {
            SurfaceType::Unknown => "UNKNOWN",
            other => other.name(),
        };
        dump_counter(&mut out, counters.surface(surface), name);
    }
    out
}
