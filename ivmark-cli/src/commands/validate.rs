// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `ivmark validate` command - Validate configuration file.

use std::path::Path;

use ivmark_core::ConfigLoader;

pub fn execute(file: &Path) -> anyhow::Result<()> {
    tracing::info!(file = %file.display(), "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Transport:");
            println!("  PCI Resource:       {}", config.transport.pci_resource.display());
            println!("  Write Combining:    {}", config.transport.write_combining);
            println!("  Fallback Path:      {}", config.transport.fallback_path.display());
            println!(
                "  Region Size:        {} MB",
                config.transport.region_size / (1024 * 1024)
            );
            println!();
            println!("Host:");
            println!("  Poll Interval:      {:?}", config.host.poll_interval);
            println!("  Guest Ready Wait:   {:?}", config.host.guest_ready_timeout);
            println!("  Processing Wait:    {:?}", config.host.processing_timeout);
            println!("  Ack Wait:           {:?}", config.host.ack_timeout);
            println!("  Release Wait:       {:?}", config.host.release_timeout);
            println!("  Overhead Formula:   {:?}", config.host.overhead);
            println!();
            println!("Guest:");
            println!("  Attach Interval:    {:?}", config.guest.attach_interval);
            println!("  Attach Timeout:     {:?}", config.guest.attach_timeout);
            println!("  Idle Timeout:       {:?}", config.guest.idle_timeout);
            println!("  Release Wait:       {:?}", config.guest.release_timeout);
            println!();
            println!("Pipeline:");
            println!("  Hardware Counters:  {}", config.pipeline.hardware_counters);
            println!("  Flush Cache:        {}", config.pipeline.flush_cache);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
