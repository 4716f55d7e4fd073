use std::{
    io::{self, Write},
    time::Duration,
};

use postcopy_core::{CoreConfig, Efficiency, MigrationReport};

const MIB: f64 = 1024.0 * 1024.0;

fn banner(out: &mut impl Write, width: usize, title: &str) -> io::Result<()> {
    let rule = "=".repeat(width);
    writeln!(out, "{rule}")?;
    writeln!(out, "{title}")?;
    writeln!(out, "{rule}")
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB
}

/// Prints the program header.
pub fn header(out: &mut impl Write) -> io::Result<()> {
    banner(out, 60, "    POST-COPY LIVE VM MIGRATION SIMULATOR")?;
    writeln!(out)
}

/// Prints the accepted parameters before the run starts.
pub fn configuration(out: &mut impl Write, config: &CoreConfig) -> io::Result<()> {
    let free_pages = (config.total_pages() as f64 * config.free_page_ratio()) as u64;

    writeln!(out)?;
    banner(out, 50, "    SIMULATION CONFIGURATION")?;
    writeln!(
        out,
        "VM Size: {:.0} MB ({} pages)",
        config.vm_size_mb(),
        config.total_pages()
    )?;
    writeln!(
        out,
        "Page Size: {} KB (Standard OS page size)",
        config.page_size().kib()
    )?;
    writeln!(out, "Free Page Ratio: {:.1}%", config.free_page_ratio() * 100.0)?;
    writeln!(out, "Link Speed: {} Mbps", config.link_speed_mbps())?;
    writeln!(out, "Expected DSB Savings: ~{free_pages} pages")?;
    writeln!(out)
}

/// Prints the guest layout at the start of the migration.
pub fn migration_start(out: &mut impl Write, config: &CoreConfig) -> io::Result<()> {
    let page_size = config.page_size();

    writeln!(out, "Initialized {} pages in source memory", config.total_pages())?;
    banner(
        out,
        66,
        "    PURE POST-COPY LIVE VM MIGRATION SIMULATION\n    (DEMAND PAGING ONLY - NO ACTIVE PUSH)",
    )?;
    writeln!(out, "VM Configuration:")?;
    writeln!(out, "  - Total Pages: {} pages", config.total_pages())?;
    writeln!(
        out,
        "  - Page Size: {} KB ({} bytes)",
        page_size.kib(),
        page_size.bytes()
    )?;
    writeln!(out, "  - Total VM Memory: {:.1} MB", config.vm_size_mb())?;
    writeln!(
        out,
        "  - Non-pageable pages: {} (critical system pages)",
        config.non_pageable_pages()
    )?;
    writeln!(out, "  - Link Speed: {} Mbps", config.link_speed_mbps())?;
    writeln!(
        out,
        "  - Page Transfer Time: {} ms per page",
        config.timer().per_page_ms()
    )?;
    writeln!(out)
}

/// Prints the final report.
pub fn summary(out: &mut impl Write, report: &MigrationReport) -> io::Result<()> {
    let page_kib = report.page_size / 1024;
    let downtime_ms = report.downtime.as_millis();
    let resume_ms = report.resume.as_millis();
    let total_ms = report.total.as_millis();

    writeln!(out)?;
    banner(
        out,
        70,
        "             PURE POST-COPY MIGRATION COMPLETED",
    )?;
    writeln!(out)?;

    writeln!(out, "DEMAND PAGING POST-COPY MIGRATION METRICS:")?;
    writeln!(out, "   - Preparation Time: {} ms", report.preparation.as_millis())?;
    writeln!(out, "   - Downtime (VM Suspended): {downtime_ms} ms")?;
    writeln!(out, "   - Resume Time (VM Running): {resume_ms} ms")?;
    writeln!(out, "   - TOTAL MIGRATION TIME: {total_ms} ms")?;
    writeln!(out)?;

    writeln!(out, "MEMORY TRANSFER STATISTICS:")?;
    writeln!(
        out,
        "   - VM Size: {} pages ({:.1} MB)",
        report.total_pages,
        mib(report.vm_bytes())
    )?;
    writeln!(out, "   - Page Size: {page_kib} KB per page")?;
    writeln!(
        out,
        "   - Non-pageable Pages (Downtime): {} pages ({} KB)",
        report.non_pageable_pages,
        report.non_pageable_bytes() / 1024
    )?;
    writeln!(
        out,
        "   - Pages Transferred on Demand: {} pages ({} KB)",
        report.demand_transferred,
        report.demand_bytes() / 1024
    )?;
    writeln!(
        out,
        "   - Total Pages Transferred: {} pages ({} KB)",
        report.total_transferred,
        report.bytes_transferred() / 1024
    )?;
    writeln!(
        out,
        "   - Total Data Transferred: {:.2} MB",
        mib(report.bytes_transferred())
    )?;
    writeln!(
        out,
        "   - Pages NOT Transferred: {} pages ({:.2} MB saved!)",
        report.never_transferred,
        mib(report.bytes_saved())
    )?;
    writeln!(
        out,
        "   - Pages Transferred: {:.3}% of VM",
        report.transferred_percent()
    )?;
    writeln!(
        out,
        "   - Bandwidth Savings: {:.3}% saved",
        report.bandwidth_savings_percent()
    )?;
    writeln!(
        out,
        "   - Post-Copy Efficiency: {}",
        match report.efficiency() {
            Efficiency::Excellent => "EXCELLENT",
            Efficiency::Good => "GOOD",
            Efficiency::Fair => "FAIR",
        }
    )?;
    writeln!(out, "   - Page Faults: {}", report.page_faults)?;
    writeln!(out, "   - Total Memory Accesses: {}", report.memory_accesses)?;
    writeln!(out, "   - Fault Rate: {:.2}%", report.fault_rate_percent())?;
    writeln!(out)?;

    writeln!(out, "APPLICATION IMPACT ANALYSIS:")?;
    writeln!(out, "   - VM Downtime: {downtime_ms} ms (Service Interruption)")?;
    writeln!(out, "   - Performance Degradation: {resume_ms} ms (Due to page faults)")?;
    writeln!(out, "   - Downtime Percentage: {:.2}%", report.downtime_percent())?;
    writeln!(out, "   - Source VM Resources: FREED")?;
    writeln!(out)?;

    writeln!(out, "POST-COPY MIGRATION SUMMARY:")?;
    writeln!(
        out,
        "   - Only {}/{} pages were actually needed and transferred",
        report.total_transferred, report.total_pages
    )?;
    writeln!(
        out,
        "   - {} pages were never accessed ({:.2} MB bandwidth saved!)",
        report.never_transferred,
        mib(report.bytes_saved())
    )?;
    writeln!(
        out,
        "   - Migration completed in {:.2} seconds",
        report.total.as_secs_f64()
    )?;
    writeln!(
        out,
        "   - Average demand transfer rate: {:.0} pages/second ({:.2} MB/s)",
        report.average_transfer_rate_pages_per_sec(),
        report.average_transfer_rate_bytes_per_sec() / MIB
    )?;

    if report.cancelled {
        writeln!(out, "   - Resume was cancelled before the workload finished")?;
    }
    for kind in &report.unresponsive_actors {
        writeln!(out, "   - {kind} did not stop in time")?;
    }

    writeln!(out)?;
    if report.cancelled {
        writeln!(out, "Pure Post-Copy Live Migration with Demand Paging was interrupted.")
    }
    else {
        writeln!(out, "Pure Post-Copy Live Migration with Demand Paging completed successfully!")?;
        writeln!(out, "Key benefit: Only transferred pages that were actually needed by the VM!")
    }
}

/// Prints the wall-clock time of the whole simulation.
pub fn footer(out: &mut impl Write, elapsed: Duration) -> io::Result<()> {
    writeln!(out)?;
    banner(
        out,
        60,
        &format!("SIMULATION COMPLETED IN {} ms", elapsed.as_millis()),
    )
}

#[cfg(test)]
mod tests {
    use postcopy_core::{ActorKind, UnresponsiveActors};

    use super::*;

    fn report() -> MigrationReport {
        MigrationReport {
            preparation: Duration::from_millis(2),
            downtime: Duration::from_millis(50),
            resume: Duration::from_millis(1948),
            total: Duration::from_millis(2000),
            total_pages: 524_288,
            page_size: 4096,
            non_pageable_pages: 50,
            free_pages: 104_857,
            total_transferred: 150,
            demand_transferred: 100,
            never_transferred: 524_138,
            page_faults: 100,
            memory_accesses: 100,
            cancelled: false,
            unresponsive_actors: UnresponsiveActors::new(),
        }
    }

    fn rendered(report: &MigrationReport) -> String {
        let mut out = Vec::new();
        summary(&mut out, report).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn renders_metrics() {
        let output = rendered(&report());

        assert!(output.contains("   - Downtime (VM Suspended): 50 ms\n"));
        assert!(output.contains("   - TOTAL MIGRATION TIME: 2000 ms\n"));
        assert!(output.contains("   - VM Size: 524288 pages (2048.0 MB)\n"));
        assert!(output.contains("   - Non-pageable Pages (Downtime): 50 pages (200 KB)\n"));
        assert!(output.contains("   - Pages Transferred on Demand: 100 pages (400 KB)\n"));
        assert!(output.contains("   - Total Pages Transferred: 150 pages (600 KB)\n"));
        assert!(output.contains("   - Post-Copy Efficiency: EXCELLENT\n"));
        assert!(output.contains("   - Fault Rate: 100.00%\n"));
        assert!(output.contains("   - Downtime Percentage: 2.50%\n"));
        assert!(output.contains("   - Only 150/524288 pages were actually needed and transferred\n"));
        assert!(output.contains("   - Migration completed in 2.00 seconds\n"));
        assert!(output.ends_with("Key benefit: Only transferred pages that were actually needed by the VM!\n"));
    }

    #[test]
    fn renders_interruption() {
        let mut report = report();
        report.cancelled = true;
        report.unresponsive_actors.push(ActorKind::PagingService);

        let output = rendered(&report);

        assert!(output.contains("   - Resume was cancelled before the workload finished\n"));
        assert!(output.contains("   - paging-service did not stop in time\n"));
        assert!(output.ends_with("was interrupted.\n"));
    }

    #[test]
    fn renders_configuration() {
        let config = CoreConfig::builder()
            .vm_size_mb(512)
            .free_page_ratio(0.25)
            .link_speed_mbps(100.0)
            .build()
            .unwrap();

        let mut out = Vec::new();
        configuration(&mut out, &config).unwrap();
        let output = String::from_utf8(out).unwrap();

        assert!(output.contains("VM Size: 512 MB (131072 pages)\n"));
        assert!(output.contains("Page Size: 4 KB (Standard OS page size)\n"));
        assert!(output.contains("Free Page Ratio: 25.0%\n"));
        assert!(output.contains("Link Speed: 100 Mbps\n"));
        assert!(output.contains("Expected DSB Savings: ~32768 pages\n"));
    }
}
