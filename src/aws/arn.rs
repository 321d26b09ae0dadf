//! Region/partition-aware ARN, service-principal, and DNS-suffix derivation
//!
//! §6 requires recognizing the standard, China, and GovCloud partitions.
//! §8 requires this derivation to be total (every region maps to something)
//! and stable (same region always yields the same triple).

/// The three AWS partitions this operator knows how to target.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Partition {
    Standard,
    China,
    GovCloud,
}

impl Partition {
    pub fn of_region(region: &str) -> Self {
        if region.starts_with("cn-") {
            Partition::China
        } else if region.starts_with("us-gov-") {
            Partition::GovCloud
        } else {
            Partition::Standard
        }
    }

    pub fn arn_prefix(self) -> &'static str {
        match self {
            Partition::Standard => "arn:aws",
            Partition::China => "arn:aws-cn",
            Partition::GovCloud => "arn:aws-us-gov",
        }
    }

    pub fn ec2_service_principal(self) -> &'static str {
        match self {
            Partition::Standard | Partition::GovCloud => "ec2.amazonaws.com",
            Partition::China => "ec2.amazonaws.com.cn",
        }
    }

    pub fn dns_suffix(self) -> &'static str {
        match self {
            Partition::Standard | Partition::GovCloud => "amazonaws.com",
            Partition::China => "amazonaws.com.cn",
        }
    }
}

/// Convenience bundle used when templating stack bodies (§4.2, §6).
pub struct RegionContext {
    pub region: String,
    pub partition: Partition,
}

impl RegionContext {
    pub fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let partition = Partition::of_region(&region);
        Self { region, partition }
    }

    pub fn arn_prefix(&self) -> &'static str {
        self.partition.arn_prefix()
    }

    pub fn ec2_service_principal(&self) -> &'static str {
        self.partition.ec2_service_principal()
    }

    pub fn dns_suffix(&self) -> &'static str {
        self.partition.dns_suffix()
    }

    /// The STS OIDC federation audience used when registering an OIDC
    /// provider (§4.6 step 2): `sts.amazonaws.com` in standard/govcloud,
    /// `sts.amazonaws.com.cn` in China.
    pub fn sts_audience(&self) -> String {
        format!("sts.{}", self.dns_suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_total_and_stable() {
        for region in ["us-east-1", "cn-north-1", "us-gov-west-1", "eu-west-9999"] {
            let ctx1 = RegionContext::new(region);
            let ctx2 = RegionContext::new(region);
            assert_eq!(ctx1.arn_prefix(), ctx2.arn_prefix());
            assert_eq!(ctx1.ec2_service_principal(), ctx2.ec2_service_principal());
            assert_eq!(ctx1.dns_suffix(), ctx2.dns_suffix());
        }
    }

    #[test]
    fn standard_region() {
        let ctx = RegionContext::new("us-east-1");
        assert_eq!(ctx.arn_prefix(), "arn:aws");
        assert_eq!(ctx.ec2_service_principal(), "ec2.amazonaws.com");
        assert_eq!(ctx.dns_suffix(), "amazonaws.com");
    }

    #[test]
    fn china_region() {
        let ctx = RegionContext::new("cn-north-1");
        assert_eq!(ctx.arn_prefix(), "arn:aws-cn");
        assert_eq!(ctx.ec2_service_principal(), "ec2.amazonaws.com.cn");
        assert_eq!(ctx.dns_suffix(), "amazonaws.com.cn");
    }

    #[test]
    fn govcloud_region() {
        let ctx = RegionContext::new("us-gov-west-1");
        assert_eq!(ctx.arn_prefix(), "arn:aws-us-gov");
        assert_eq!(ctx.ec2_service_principal(), "ec2.amazonaws.com");
        assert_eq!(ctx.dns_suffix(), "amazonaws.com");
    }

    #[test]
    fn unknown_region_falls_back_to_standard() {
        let ctx = RegionContext::new("mars-central-1");
        assert_eq!(ctx.arn_prefix(), "arn:aws");
    }
}
