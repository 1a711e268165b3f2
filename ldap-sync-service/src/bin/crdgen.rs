//! Print the LdapUser CustomResourceDefinition for `kubectl apply -f -`.

use kube::CustomResourceExt;
use ldap_sync_service::models::LdapUser;

fn main() -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(&LdapUser::crd())?);
    Ok(())
}
