use crate::{
    controller::ObjectKey,
    crd::MyStatefulSet,
    store::{self, ObjectStore},
};

/// Fetches the current desired state. An object which no longer exists is
/// reported as [`None`], every other failure as an error.
pub async fn resolve<S: ObjectStore>(
    store: &S,
    key: &ObjectKey,
) -> store::Result<Option<MyStatefulSet>> {
    store.get_opt(&key.namespace, &key.name).await
}
