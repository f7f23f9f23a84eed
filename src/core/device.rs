// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device description and the per-device context
//!
//! A [`Context`] is created once at startup and passed by reference to
//! everything that builds or submits work. It owns the kernel collaborator,
//! the device's capabilities, the configuration, the buffer manager and
//! the execution bridge.
//!
//! # Supported devices
//!
//! | Family      | Gen | Notes                  |
//! |-------------|-----|------------------------|
//! | Sandybridge | 6   |                        |
//! | Ivybridge   | 7   |                        |
//! | Haswell     | 7   | adds the vebox engine  |
//! | Valleyview  | 7   | low power              |
//! | Broadwell   | 8   | 48-bit addresses       |
//! | Cherryview  | 8   | low power              |
//! | Skylake     | 9   | fast copy blitter      |
//! | Broxton     | 9   | low power              |
//! | Kabylake    | 9   |                        |

use std::sync::Arc;

use serde::Serialize;

use crate::core::batch::BatchBuffer;
use crate::core::bo::{max_stride, BufferManager};
use crate::core::config::Config;
use crate::core::driver::sim::{SimConfig, SimDriver};
use crate::core::driver::GemDriver;
use crate::core::error::{GemError, Result};
use crate::core::exec::{Engine, ExecBridge};
use crate::core::gen::{EmitOps, GenOps};
use crate::core::reloc::AddressTable;

/// (device id, generation, family, haswell, low power)
const DEVICE_TABLE: &[(u16, u8, &str, bool, bool)] = &[
    (0x0102, 6, "Sandybridge", false, false),
    (0x0106, 6, "Sandybridge", false, false),
    (0x010a, 6, "Sandybridge", false, false),
    (0x0112, 6, "Sandybridge", false, false),
    (0x0116, 6, "Sandybridge", false, false),
    (0x0122, 6, "Sandybridge", false, false),
    (0x0126, 6, "Sandybridge", false, false),
    (0x0152, 7, "Ivybridge", false, false),
    (0x0156, 7, "Ivybridge", false, false),
    (0x015a, 7, "Ivybridge", false, false),
    (0x0162, 7, "Ivybridge", false, false),
    (0x0166, 7, "Ivybridge", false, false),
    (0x016a, 7, "Ivybridge", false, false),
    (0x0402, 7, "Haswell", true, false),
    (0x0406, 7, "Haswell", true, false),
    (0x0412, 7, "Haswell", true, false),
    (0x0416, 7, "Haswell", true, false),
    (0x0422, 7, "Haswell", true, false),
    (0x0426, 7, "Haswell", true, false),
    (0x0a16, 7, "Haswell", true, false),
    (0x0d22, 7, "Haswell", true, false),
    (0x0f30, 7, "Valleyview", false, true),
    (0x0f31, 7, "Valleyview", false, true),
    (0x0f32, 7, "Valleyview", false, true),
    (0x0f33, 7, "Valleyview", false, true),
    (0x1602, 8, "Broadwell", false, false),
    (0x1606, 8, "Broadwell", false, false),
    (0x1612, 8, "Broadwell", false, false),
    (0x1616, 8, "Broadwell", false, false),
    (0x161e, 8, "Broadwell", false, false),
    (0x1622, 8, "Broadwell", false, false),
    (0x1626, 8, "Broadwell", false, false),
    (0x22b0, 8, "Cherryview", false, true),
    (0x22b1, 8, "Cherryview", false, true),
    (0x22b2, 8, "Cherryview", false, true),
    (0x22b3, 8, "Cherryview", false, true),
    (0x1902, 9, "Skylake", false, false),
    (0x1906, 9, "Skylake", false, false),
    (0x1912, 9, "Skylake", false, false),
    (0x1916, 9, "Skylake", false, false),
    (0x191b, 9, "Skylake", false, false),
    (0x191e, 9, "Skylake", false, false),
    (0x1926, 9, "Skylake", false, false),
    (0x0a84, 9, "Broxton", false, true),
    (0x1a84, 9, "Broxton", false, true),
    (0x5a84, 9, "Broxton", false, true),
    (0x5902, 9, "Kabylake", false, false),
    (0x5906, 9, "Kabylake", false, false),
    (0x5912, 9, "Kabylake", false, false),
    (0x5916, 9, "Kabylake", false, false),
    (0x591b, 9, "Kabylake", false, false),
    (0x591e, 9, "Kabylake", false, false),
    (0x5926, 9, "Kabylake", false, false),
];

/// Identity and capabilities of one GPU
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub devid: u16,
    pub gen: u8,
    pub family: &'static str,
    pub is_haswell: bool,
    pub is_low_power: bool,
}

impl DeviceInfo {
    /// Look up a PCI device id
    ///
    /// # Errors
    ///
    /// `GemError::UnsupportedDevice` for ids outside the table
    pub fn from_devid(devid: u16) -> Result<Self> {
        DEVICE_TABLE
            .iter()
            .find(|entry| entry.0 == devid)
            .map(|&(devid, gen, family, is_haswell, is_low_power)| Self {
                devid,
                gen,
                family,
                is_haswell,
                is_low_power,
            })
            .ok_or(GemError::UnsupportedDevice(devid))
    }

    /// The first table entry of a generation
    ///
    /// Generations outside 6..=9 yield a synthetic device with id 0, which
    /// [`Context::new`] rejects.
    pub fn for_gen(gen: u8) -> Self {
        DEVICE_TABLE
            .iter()
            .find(|entry| entry.1 == gen)
            .map(|&(devid, gen, family, is_haswell, is_low_power)| Self {
                devid,
                gen,
                family,
                is_haswell,
                is_low_power,
            })
            .unwrap_or(Self {
                devid: 0,
                gen,
                family: "unknown",
                is_haswell: false,
                is_low_power: false,
            })
    }

    pub fn has_blt_ring(&self) -> bool {
        self.gen >= 6
    }

    pub fn has_bsd_ring(&self) -> bool {
        self.gen >= 6
    }

    pub fn has_vebox_ring(&self) -> bool {
        self.is_haswell || self.gen >= 8
    }

    pub fn has_fast_copy(&self) -> bool {
        self.gen >= 9
    }

    pub fn has_engine(&self, engine: Engine) -> bool {
        match engine {
            Engine::Default | Engine::Render => true,
            Engine::Bsd => self.has_bsd_ring(),
            Engine::Blt => self.has_blt_ring(),
            Engine::Vebox => self.has_vebox_ring(),
        }
    }

    /// Dwords per relocated address
    pub fn address_words(&self) -> usize {
        if self.gen >= 8 {
            2
        } else {
            1
        }
    }

    pub fn max_tiling_stride(&self) -> u32 {
        max_stride(self.gen)
    }

    /// Fence registers available for tiled access
    pub fn fence_slots(&self) -> usize {
        if self.gen >= 7 && !(self.is_low_power && self.gen == 7) {
            32
        } else {
            16
        }
    }
}

/// Everything needed to build and submit work on one device
pub struct Context {
    info: DeviceInfo,
    config: Config,
    ops: GenOps,
    driver: Arc<dyn GemDriver>,
    bufmgr: BufferManager,
    bridge: ExecBridge,
}

impl Context {
    /// Create a context on top of a kernel collaborator
    ///
    /// # Errors
    ///
    /// `GemError::UnsupportedDevice` if the generation has no emission
    /// table, `GemError::Config` if the configuration is inconsistent.
    pub fn new(driver: Arc<dyn GemDriver>, info: DeviceInfo, config: Config) -> Result<Self> {
        config.validate()?;
        let ops = GenOps::for_gen(info.gen).ok_or(GemError::UnsupportedDevice(info.devid))?;

        let addresses = Arc::new(AddressTable::new());
        let bufmgr = BufferManager::new(Arc::clone(&driver), info.gen, Arc::clone(&addresses));
        let bridge = ExecBridge::new(Arc::clone(&driver), addresses, &config);

        log::info!(
            "{} (devid {:#06x}, gen{}) ready: {}-byte batches, optimistic relocations {}",
            info.family,
            info.devid,
            info.gen,
            config.batch_size,
            if config.optimistic_relocations {
                "on"
            } else {
                "off"
            }
        );

        Ok(Self {
            info,
            config,
            ops,
            driver,
            bufmgr,
            bridge,
        })
    }

    /// Create a context on a fresh simulated driver
    pub fn simulated(info: DeviceInfo, config: Config) -> Result<Self> {
        Self::with_simulator(info, config, SimConfig::for_device(&info)).map(|(ctx, _)| ctx)
    }

    /// Create a context on a simulated driver and keep a handle to it
    pub fn with_simulator(
        info: DeviceInfo,
        config: Config,
        sim: SimConfig,
    ) -> Result<(Self, Arc<SimDriver>)> {
        let driver = Arc::new(SimDriver::new(sim));
        let ctx = Self::new(Arc::clone(&driver) as Arc<dyn GemDriver>, info, config)?;
        Ok((ctx, driver))
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn gen(&self) -> u8 {
        self.info.gen
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ops(&self) -> &GenOps {
        &self.ops
    }

    pub fn driver(&self) -> &Arc<dyn GemDriver> {
        &self.driver
    }

    pub fn bufmgr(&self) -> &BufferManager {
        &self.bufmgr
    }

    pub fn bridge(&self) -> &ExecBridge {
        &self.bridge
    }

    pub fn address_words(&self) -> usize {
        self.ops.address_words()
    }

    /// Start a new batch stream on this device
    pub fn batch(&self) -> Result<BatchBuffer<'_>> {
        BatchBuffer::new(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_devid() {
        let snb = DeviceInfo::from_devid(0x0116).unwrap();
        assert_eq!(snb.gen, 6);
        assert_eq!(snb.family, "Sandybridge");

        let hsw = DeviceInfo::from_devid(0x0412).unwrap();
        assert_eq!(hsw.gen, 7);
        assert!(hsw.is_haswell);

        let skl = DeviceInfo::from_devid(0x1912).unwrap();
        assert_eq!(skl.gen, 9);
        assert_eq!(skl.family, "Skylake");
    }

    #[test]
    fn test_unsupported_devid() {
        let result = DeviceInfo::from_devid(0x2a42);
        assert!(matches!(result, Err(GemError::UnsupportedDevice(0x2a42))));
    }

    #[test]
    fn test_for_gen() {
        for gen in 6..=9 {
            let info = DeviceInfo::for_gen(gen);
            assert_eq!(info.gen, gen);
            assert_ne!(info.devid, 0);
        }
        assert_eq!(DeviceInfo::for_gen(5).devid, 0);
    }

    #[test]
    fn test_capabilities() {
        let ivb = DeviceInfo::for_gen(7);
        assert!(ivb.has_blt_ring());
        assert!(!ivb.has_vebox_ring());
        assert!(!ivb.has_fast_copy());
        assert_eq!(ivb.address_words(), 1);
        assert_eq!(ivb.max_tiling_stride(), 256 * 1024);

        let bdw = DeviceInfo::for_gen(8);
        assert!(bdw.has_vebox_ring());
        assert_eq!(bdw.address_words(), 2);

        let skl = DeviceInfo::for_gen(9);
        assert!(skl.has_fast_copy());
        assert!(skl.has_engine(Engine::Vebox));

        let snb = DeviceInfo::for_gen(6);
        assert!(!snb.has_engine(Engine::Vebox));
        assert!(snb.has_engine(Engine::Default));
        assert_eq!(snb.max_tiling_stride(), 128 * 1024);
    }

    #[test]
    fn test_fence_slots() {
        assert_eq!(DeviceInfo::for_gen(6).fence_slots(), 16);
        assert_eq!(DeviceInfo::for_gen(8).fence_slots(), 32);
        assert_eq!(DeviceInfo::from_devid(0x0412).unwrap().fence_slots(), 32);
        assert_eq!(DeviceInfo::from_devid(0x0f31).unwrap().fence_slots(), 16);
    }

    #[test]
    fn test_context_rejects_unsupported_gen() {
        let result = Context::simulated(DeviceInfo::for_gen(5), Config::default());
        assert!(matches!(result, Err(GemError::UnsupportedDevice(0))));
    }

    #[test]
    fn test_context_rejects_bad_config() {
        let config = Config {
            batch_reserved: 4,
            ..Config::default()
        };
        let result = Context::simulated(DeviceInfo::for_gen(8), config);
        assert!(matches!(result, Err(GemError::Config(_))));
    }

    #[test]
    fn test_context_accessors() {
        let ctx = Context::simulated(DeviceInfo::for_gen(8), Config::default()).unwrap();
        assert_eq!(ctx.gen(), 8);
        assert_eq!(ctx.address_words(), 2);
        assert_eq!(ctx.config().batch_size, 4096);
        assert_eq!(ctx.bridge().pending_count(), 0);

        let batch = ctx.batch().unwrap();
        assert!(batch.is_empty());
    }
}
