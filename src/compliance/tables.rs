//! Built-in finding type to control tables.

/// `(finding type, control id, control title)`.
pub(super) const CIS: &[(&str, &str, &str)] = &[
    ("s3_public_access", "2.1.1", "S3 Block Public Access"),
    ("s3_no_encryption", "2.1.2", "S3 Bucket Encryption"),
    ("s3_no_versioning", "2.1.3", "S3 Versioning"),
    ("storage_public_access", "3.1", "Storage Public Access"),
    ("storage_no_encryption", "3.2", "Storage Encryption"),
    ("storage_no_versioning", "3.3", "Storage Versioning"),
    ("iam_root_access_keys", "1.4", "Root Access Keys Inactive"),
    ("iam_no_mfa", "1.10", "MFA for Console Access"),
    ("iam_overprivileged", "1.16", "Least Privilege IAM Policies"),
    ("rbac_broad_role", "1.1", "Azure RBAC Least Privilege"),
    ("rbac_sp_owner", "1.2", "Azure SP No Owner"),
    ("iam_broad_role", "1.4", "GCP IAM Least Privilege"),
    ("iam_sa_owner", "1.5", "GCP SA No Owner"),
    ("security_group_open", "4.1", "Restrict Security Group Rules"),
    ("nsg_open_rule", "6.1", "NSG Restrict Inbound"),
    ("firewall_open_rule", "3.7", "Firewall Restrict Inbound"),
    ("ec2_imdsv1", "4.2", "EC2 IMDSv2 Required"),
    ("ec2_public_ip", "4.3", "EC2 Public Exposure"),
    ("ebs_unencrypted", "4.4", "EBS Encryption"),
    ("azure_vm_public_ip", "7.1", "Azure VM Public Exposure"),
    ("gce_public_ip", "4.9", "GCE Public IP"),
    ("cloudtrail_disabled", "3.1", "CloudTrail Enabled"),
    ("cloudtrail_not_logging", "3.2", "CloudTrail Logging"),
];

/// NIST CSF subcategories; the subcategory doubles as the title.
pub(super) const NIST: &[(&str, &str)] = &[
    ("s3_public_access", "PR.AC-5"),
    ("s3_no_encryption", "PR.DS-1"),
    ("storage_public_access", "PR.AC-5"),
    ("storage_no_encryption", "PR.DS-1"),
    ("iam_root_access_keys", "PR.AC-4"),
    ("iam_no_mfa", "PR.AC-7"),
    ("iam_overprivileged", "PR.AC-4"),
    ("rbac_broad_role", "PR.AC-4"),
    ("rbac_sp_owner", "PR.AC-4"),
    ("iam_broad_role", "PR.AC-4"),
    ("iam_sa_owner", "PR.AC-4"),
    ("security_group_open", "PR.AC-5"),
    ("nsg_open_rule", "PR.AC-5"),
    ("firewall_open_rule", "PR.AC-5"),
    ("ec2_imdsv1", "PR.IP-1"),
    ("ebs_unencrypted", "PR.DS-1"),
    ("azure_vm_public_ip", "PR.AC-5"),
    ("gce_public_ip", "PR.AC-5"),
    ("cloudtrail_disabled", "DE.CM-1"),
    ("cloudtrail_not_logging", "DE.CM-1"),
];

pub(super) const PCI_DSS: &[(&str, &str)] = &[
    ("s3_public_access", "3.4"),
    ("s3_no_encryption", "3.4"),
    ("storage_public_access", "3.4"),
    ("storage_no_encryption", "3.4"),
    ("iam_root_access_keys", "7.1"),
    ("iam_no_mfa", "8.2"),
    ("iam_overprivileged", "7.1"),
    ("rbac_broad_role", "7.1"),
    ("rbac_sp_owner", "7.1"),
    ("iam_broad_role", "7.1"),
    ("iam_sa_owner", "7.1"),
    ("security_group_open", "1.2"),
    ("nsg_open_rule", "1.2"),
    ("firewall_open_rule", "1.2"),
    ("ec2_imdsv1", "2.2"),
    ("ebs_unencrypted", "3.4"),
    ("azure_vm_public_ip", "1.3"),
    ("gce_public_ip", "1.3"),
    ("cloudtrail_disabled", "10.2"),
    ("cloudtrail_not_logging", "10.2"),
];

pub(super) const HIPAA: &[(&str, &str)] = &[
    ("s3_public_access", "Access Control"),
    ("s3_no_encryption", "Encryption"),
    ("storage_public_access", "Access Control"),
    ("storage_no_encryption", "Encryption"),
    ("iam_root_access_keys", "Access Control"),
    ("iam_no_mfa", "Access Control"),
    ("iam_overprivileged", "Access Control"),
    ("rbac_broad_role", "Access Control"),
    ("rbac_sp_owner", "Access Control"),
    ("iam_broad_role", "Access Control"),
    ("iam_sa_owner", "Access Control"),
    ("security_group_open", "Access Control"),
    ("nsg_open_rule", "Access Control"),
    ("firewall_open_rule", "Access Control"),
    ("ec2_imdsv1", "Integrity"),
    ("ebs_unencrypted", "Encryption"),
    ("azure_vm_public_ip", "Access Control"),
    ("gce_public_ip", "Access Control"),
    ("cloudtrail_disabled", "Audit Controls"),
    ("cloudtrail_not_logging", "Audit Controls"),
];
