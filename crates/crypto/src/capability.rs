//! Runtime hardware-crypto capability probe, surfaced once at session start.
//!
//! Kept from the reference crate's `log_arm_crypto_support`: on aarch64/Linux
//! it reads `/proc/cpuinfo` for the ARMv8 Cryptography Extensions, since
//! that's the only portable way to check without a CPUID-equivalent crate.

/// Print a one-shot banner describing whether hardware AES/PMULL/SHA
/// acceleration is available. Safe to call from either binary's `main`.
pub fn log_hardware_crypto_support() {
    #[cfg(all(target_arch = "aarch64", target_os = "linux"))]
    {
        let cpu_features = std::fs::read_to_string("/proc/cpuinfo").unwrap_or_default();
        let aes = cpu_features.contains("aes");
        let pmull = cpu_features.contains("pmull");
        let sha2 = cpu_features.contains("sha2");

        eprintln!("=== ARMv8 Crypto Extensions Detection ===");
        eprintln!("AES:   {}", if aes { "ACTIVE" } else { "NOT DETECTED" });
        eprintln!("PMULL: {}", if pmull { "ACTIVE" } else { "NOT DETECTED" });
        eprintln!("SHA2:  {}", if sha2 { "ACTIVE" } else { "NOT DETECTED" });
        eprintln!("==========================================");

        if !aes || !pmull {
            eprintln!("WARNING: hardware AES-GCM acceleration not fully active");
        }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "linux")))]
    {
        eprintln!("=== Hardware Crypto Detection ===");
        eprintln!("Runtime detection not available on this platform/OS combination");
        eprintln!("==================================");
    }
}
