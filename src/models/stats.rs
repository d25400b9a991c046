use serde::Serialize;

/// 单次资源读数（不持久化）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResourceReading {
    Available {
        /// CPU 使用率（自上次采样以来，可能超过 100）
        cpu_percent: f32,
        /// 常驻内存（字节）
        resident_bytes: u64,
    },
    #[default]
    Unavailable,
}

impl ResourceReading {
    pub fn cpu_percent(&self) -> Option<f32> {
        match self {
            Self::Available { cpu_percent, .. } => Some(*cpu_percent),
            Self::Unavailable => None,
        }
    }

    pub fn resident_bytes(&self) -> Option<u64> {
        match self {
            Self::Available { resident_bytes, .. } => Some(*resident_bytes),
            Self::Unavailable => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_reading_has_no_values() {
        let reading = ResourceReading::default();
        assert_eq!(reading.cpu_percent(), None);
        assert_eq!(reading.resident_bytes(), None);

        let reading = ResourceReading::Available {
            cpu_percent: 12.5,
            resident_bytes: 4096,
        };
        assert_eq!(reading.cpu_percent(), Some(12.5));
        assert_eq!(reading.resident_bytes(), Some(4096));
    }
}
